use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for document ids, including characters that need escaping in file names
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./:-]{1,12}"
}

/// Strategy for id lists with duplicates
pub fn id_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(document_id_strategy(), 0..200)
}

/// Strategy for scalar JSON values
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(|n| json!(n)),
        "[a-z ]{0,8}".prop_map(Value::String),
    ]
}

/// Strategy for nested JSON values (objects keyed with pointer-hostile names)
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c~/]{1,3}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for documents carrying an `_id`
pub fn document_strategy() -> impl Strategy<Value = Value> {
    (
        document_id_strategy(),
        prop::collection::btree_map("[a-e]{1,2}", json_value_strategy(), 0..5),
    )
        .prop_map(|(id, fields)| {
            let mut object: Map<String, Value> = fields.into_iter().collect();
            object.insert("_id".to_string(), Value::String(id));
            Value::Object(object)
        })
}
