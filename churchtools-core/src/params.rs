use serde_json::{Map, Value};

/// Request parameters, a JSON object as the server expects them.
pub type Params = Map<String, Value>;

/// Flatten parameters into query pairs.
///
/// Scalars become their text form, arrays become repeated `key[]` pairs,
/// nested objects become `key[sub]` pairs and `null` is dropped.
pub fn encode_query(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        push_pairs(&mut pairs, key.clone(), value);
    }
    pairs
}

fn push_pairs(pairs: &mut Vec<(String, String)>, key: String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => pairs.push((key, s.clone())),
        Value::Bool(b) => pairs.push((key, b.to_string())),
        Value::Number(n) => pairs.push((key, n.to_string())),
        Value::Array(items) => {
            let name = format!("{}[]", key);
            for item in items {
                push_pairs(pairs, name.clone(), item);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                push_pairs(pairs, format!("{}[{}]", key, sub), item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[test]
    fn test_scalars() {
        let pairs = encode_query(&params(json!({
            "page": 2,
            "limit": 100,
            "active": true,
            "q": "Smith"
        })));
        assert!(pairs.contains(&("page".into(), "2".into())));
        assert!(pairs.contains(&("limit".into(), "100".into())));
        assert!(pairs.contains(&("active".into(), "true".into())));
        assert!(pairs.contains(&("q".into(), "Smith".into())));
    }

    #[test]
    fn test_arrays_and_nulls() {
        let pairs = encode_query(&params(json!({"ids": [1, 2], "skip": null})));
        assert_eq!(
            pairs,
            vec![("ids[]".to_string(), "1".to_string()), ("ids[]".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_nested_object() {
        let pairs = encode_query(&params(json!({"filter": {"status": "active"}})));
        assert_eq!(pairs, vec![("filter[status]".to_string(), "active".to_string())]);
    }
}
