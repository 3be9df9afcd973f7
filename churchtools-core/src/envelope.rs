//! Response envelope handling.
//!
//! Success bodies arrive as `{data: X}`, `{data: {data: X}}` or a bare `X`.
//! Paginated bodies carry `meta.pagination.lastPage` next to `data`.

use serde_json::Value;

/// Peel up to two `data` envelopes off a decoded body.
pub fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut outer) if outer.contains_key("data") => {
            let inner = outer.remove("data").unwrap_or(Value::Null);
            match inner {
                Value::Object(mut nested) if nested.contains_key("data") => {
                    nested.remove("data").unwrap_or(Value::Null)
                }
                other => other,
            }
        }
        other => other,
    }
}

/// The `lastPage` reported by a paginated body, if any.
///
/// Looks at the top level first and then inside the first `data` envelope,
/// since both layouts occur.
pub fn last_page(body: &Value) -> Option<u64> {
    let read = |v: &Value| {
        v.pointer("/meta/pagination/lastPage").and_then(|n| {
            n.as_u64()
                .or_else(|| n.as_str().and_then(|s| s.parse().ok()))
        })
    };
    read(body).or_else(|| body.get("data").and_then(read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_single_envelope() {
        assert_eq!(unwrap_data(json!({"data": [1, 2]})), json!([1, 2]));
    }

    #[test]
    fn test_double_envelope() {
        assert_eq!(
            unwrap_data(json!({"data": {"data": {"id": 7}}})),
            json!({"id": 7})
        );
    }

    #[test]
    fn test_bare_body_untouched() {
        let body = json!({"id": 1, "name": "Gemeinde"});
        assert_eq!(unwrap_data(body.clone()), body);
        assert_eq!(unwrap_data(json!("token")), json!("token"));
        assert_eq!(unwrap_data(Value::Null), Value::Null);
    }

    #[test]
    fn test_data_member_with_scalar() {
        assert_eq!(unwrap_data(json!({"data": "abc"})), json!("abc"));
        assert_eq!(unwrap_data(json!({"data": null})), Value::Null);
    }

    #[test]
    fn test_last_page_positions() {
        let top = json!({"data": [], "meta": {"pagination": {"lastPage": 4}}});
        assert_eq!(last_page(&top), Some(4));

        let nested = json!({"data": {"data": [], "meta": {"pagination": {"lastPage": 2}}}});
        assert_eq!(last_page(&nested), Some(2));

        let text = json!({"meta": {"pagination": {"lastPage": "3"}}});
        assert_eq!(last_page(&text), Some(3));

        assert_eq!(last_page(&json!({"data": []})), None);
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(Value::String),
            prop::collection::vec(any::<u32>(), 0..4).prop_map(|v| json!(v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_unwraps_both_envelopes(x in leaf()) {
            prop_assert_eq!(unwrap_data(json!({"data": x.clone()})), x.clone());
            prop_assert_eq!(unwrap_data(json!({"data": {"data": x.clone()}})), x);
        }

        #[test]
        fn prop_bare_objects_pass_through(key in "[a-c]{1,3}", x in leaf()) {
            prop_assume!(key != "data");
            let body = json!({ key: x });
            prop_assert_eq!(unwrap_data(body.clone()), body);
        }
    }
}
