//! Lookup helpers for JSON dictionaries keyed by names or name patterns.
//!
//! Keys may be plain names, alternations such as `"(U|k|epsilon)"` with optional prefix and
//! suffix (`"(U|k)Final"`), or a trailing wildcard (`"wall.*"`, `".*"`).

use ndarray as nd;
use serde_json::{Map, Value as Json};

use crate::{Float, FvError, FvResult, Value};

pub fn key_matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return !prefix.contains('(') && name.starts_with(prefix);
    }
    // The alternation group is the innermost parentheses around the `|`s, so that keys like
    // `div(phi,(k|epsilon))` work.
    let group = match (pattern.find('|'), pattern.rfind('|')) {
        (Some(first), Some(last)) => (
            pattern[..first].rfind('('),
            pattern[last..].find(')').map(|close| close + last),
        ),
        _ => (pattern.find('('), pattern.rfind(')')),
    };
    match group {
        (Some(open), Some(close)) if open < close => {
            let (prefix, suffix) = (&pattern[..open], &pattern[close + 1..]);
            pattern[open + 1..close]
                .split('|')
                .any(|alternative| format!("{prefix}{alternative}{suffix}") == name)
        }
        _ => false,
    }
}

/// Exact key first, then the first matching pattern key.
pub fn lookup<'a>(dict: &'a Map<String, Json>, name: &str) -> Option<&'a Json> {
    dict.get(name).or_else(|| {
        dict.iter()
            .find(|(key, _)| key_matches(key, name))
            .map(|(_, value)| value)
    })
}

pub fn lookup_btree<'a, V>(
    dict: &'a std::collections::BTreeMap<String, V>,
    name: &str,
) -> Option<&'a V> {
    dict.get(name).or_else(|| {
        dict.iter()
            .find(|(key, _)| key_matches(key, name))
            .map(|(_, value)| value)
    })
}

pub fn as_dict<'a>(value: &'a Json, dictionary: &str) -> FvResult<&'a Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| FvError::invalid(dictionary, "", "expected a dictionary"))
}

pub fn required<'a>(
    dict: &'a Map<String, Json>,
    dictionary: &str,
    key: &str,
) -> FvResult<&'a Json> {
    dict.get(key).ok_or_else(|| FvError::missing(dictionary, key))
}

pub fn read_scalar(dict: &Map<String, Json>, dictionary: &str, key: &str) -> FvResult<Float> {
    required(dict, dictionary, key)?
        .as_f64()
        .ok_or_else(|| FvError::invalid(dictionary, key, "expected a number"))
}

pub fn read_string<'a>(
    dict: &'a Map<String, Json>,
    dictionary: &str,
    key: &str,
) -> FvResult<&'a str> {
    required(dict, dictionary, key)?
        .as_str()
        .ok_or_else(|| FvError::invalid(dictionary, key, "expected a string"))
}

/// An optional non-negative integer entry.
pub fn read_count_or(
    dict: &Map<String, Json>,
    dictionary: &str,
    key: &str,
    default: usize,
) -> FvResult<usize> {
    match dict.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|count| count as usize)
            .ok_or_else(|| FvError::invalid(dictionary, key, "expected a non-negative integer")),
    }
}

/// An optional switch, written either as a JSON boolean or as `yes`/`no`/`on`/`off`.
pub fn read_switch_or(
    dict: &Map<String, Json>,
    dictionary: &str,
    key: &str,
    default: bool,
) -> FvResult<bool> {
    match dict.get(key) {
        None => Ok(default),
        Some(Json::Bool(value)) => Ok(*value),
        Some(Json::String(word)) => match word.as_str() {
            "yes" | "on" | "true" => Ok(true),
            "no" | "off" | "false" => Ok(false),
            _ => Err(FvError::invalid(dictionary, key, format!("unknown switch {word}"))),
        },
        Some(_) => Err(FvError::invalid(dictionary, key, "expected a switch")),
    }
}

/// Reads a field of `size` values stored either as one uniform value or as a list.
pub fn read_field<T: Value>(
    dict: &Map<String, Json>,
    dictionary: &str,
    key: &str,
    size: usize,
) -> FvResult<nd::Array1<T>> {
    let entry = required(dict, dictionary, key)?;
    parse_field(entry, size).ok_or_else(|| {
        FvError::invalid(
            dictionary,
            key,
            format!("expected a uniform {} or a list of {size}", T::TYPE_NAME),
        )
    })
}

pub fn parse_field<T: Value>(entry: &Json, size: usize) -> Option<nd::Array1<T>> {
    if let Some(uniform) = T::from_json(entry) {
        return Some(nd::Array1::from_elem(size, uniform));
    }
    let items = entry.as_array()?;
    if items.len() != size {
        return None;
    }
    items
        .iter()
        .map(T::from_json)
        .collect::<Option<Vec<_>>>()
        .map(nd::Array1::from)
}

/// Writes a field as a uniform value when all entries agree.
pub fn write_field<T: Value>(values: &nd::Array1<T>) -> Json {
    match values.first() {
        Some(first) if values.iter().all(|value| value == first) => first.to_json(),
        _ => Json::Array(values.iter().map(|value| value.to_json()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector3;

    #[test]
    fn test_key_matches() {
        assert!(key_matches("p", "p"));
        assert!(key_matches("(U|k|epsilon)", "k"));
        assert!(key_matches("(U|k)Final", "UFinal"));
        assert!(!key_matches("(U|k)Final", "U"));
        assert!(key_matches("wall.*", "wallLower"));
        assert!(key_matches(".*", "anything"));
        assert!(!key_matches("(U|k)", "p"));
        assert!(key_matches("div(phi,(k|epsilon))", "div(phi,epsilon)"));
    }

    #[test]
    fn test_lookup_prefers_exact_keys() {
        let dict = serde_json::json!({"(p|U)": 1, "p": 2});
        let dict = dict.as_object().unwrap();
        assert_eq!(lookup(dict, "p"), Some(&serde_json::json!(2)));
        assert_eq!(lookup(dict, "U"), Some(&serde_json::json!(1)));
        assert_eq!(lookup(dict, "k"), None);
    }

    #[test]
    fn test_optional_entries() {
        let dict = serde_json::json!({"n": 3, "flag": "off", "bad": -1});
        let dict = dict.as_object().unwrap();
        assert_eq!(read_count_or(dict, "d", "n", 1).unwrap(), 3);
        assert_eq!(read_count_or(dict, "d", "missing", 1).unwrap(), 1);
        assert!(read_count_or(dict, "d", "bad", 1).is_err());
        assert!(!read_switch_or(dict, "d", "flag", true).unwrap());
        assert!(read_switch_or(dict, "d", "missing", true).unwrap());
    }

    #[test]
    fn test_read_field() {
        let dict = serde_json::json!({"uniform": [1.0, 0.0, 0.0], "list": [1.0, 2.0, 3.0]});
        let dict = dict.as_object().unwrap();
        let uniform: nd::Array1<Vector3> = read_field(dict, "d", "uniform", 2).unwrap();
        assert_eq!(uniform[1], Vector3::new(1., 0., 0.));
        let list: nd::Array1<Float> = read_field(dict, "d", "list", 3).unwrap();
        assert_eq!(list, nd::arr1(&[1., 2., 3.]));
        assert!(read_field::<Float>(dict, "d", "list", 2).is_err());
        assert!(matches!(
            read_field::<Float>(dict, "d", "missing", 2),
            Err(FvError::MissingEntry { .. })
        ));
        assert_eq!(write_field(&nd::arr1(&[2., 2.])), serde_json::json!(2.0));
    }
}
