//! Lookup helpers over the `tags` field of an event.
//!
//! A tag is `[name, value, ...rest]`; helpers that read a value skip tags
//! that only carry a name.

use std::str::FromStr;

/// The tag name (first element).
pub fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

/// The element at `index`, if present.
pub fn tag_field(tag: &[String], index: usize) -> Option<&str> {
    tag.get(index).map(String::as_str)
}

pub fn is_tag(tag: &[String], name: &str) -> bool {
    tag_name(tag) == Some(name)
}

/// First tag named `name` that carries a value.
pub fn find_tag<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a [String]> {
    tags.iter()
        .find(|tag| is_tag(tag, name) && tag_field(tag, 1).is_some())
        .map(Vec::as_slice)
}

pub fn find_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    find_tag(tags, name).and_then(|tag| tag_field(tag, 1))
}

/// Iterate the first values of every tag named `name`.
pub fn tag_values<'a>(tags: &'a [Vec<String>], name: &'a str) -> impl Iterator<Item = &'a str> {
    tags.iter()
        .filter(move |tag| is_tag(tag, name))
        .filter_map(|tag| tag_field(tag, 1))
}

pub fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tag_values(tags, name).map(str::to_owned).collect()
}

pub fn parse_tag_field<T>(tag: &[String], index: usize) -> Option<T>
where
    T: FromStr,
{
    tag_field(tag, index).and_then(|value| value.parse::<T>().ok())
}

pub fn parse_tag_value<T>(tags: &[Vec<String>], name: &str) -> Option<T>
where
    T: FromStr,
{
    find_tag(tags, name).and_then(|tag| parse_tag_field(tag, 1))
}

/// Build a tag from string-like parts.
pub fn tag<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
