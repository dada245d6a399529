use serde_json::{Map, Value};

/// Remove every denylisted key from an outgoing message. The deny-list is
/// per schema because the personal-data surface differs per record type.
pub fn strip_keys(message: &mut Map<String, Value>, deny: &[&str]) {
    for key in deny {
        message.remove(*key);
    }
}

/// Recursively drop the `*_Localised` convenience strings the game client
/// injects. They duplicate the symbolic fields in the player's UI language,
/// which the relay network neither wants nor should see.
pub fn strip_localised(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !key.ends_with("_Localised"));
            for nested in map.values_mut() {
                strip_localised(nested);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_localised(item);
            }
        }
        _ => {}
    }
}

/// Same, directly on a message map.
pub fn strip_localised_map(message: &mut Map<String, Value>) {
    message.retain(|key, _| !key.ends_with("_Localised"));
    for nested in message.values_mut() {
        strip_localised(nested);
    }
}
