use serde::{Deserialize, Serialize};

/// Values JSON cannot express directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialValue {
    #[serde(rename = "undefined")]
    Undefined,
    #[serde(rename = "NaN")]
    NaN,
    #[serde(rename = "Infinity")]
    Infinity,
    #[serde(rename = "-Infinity")]
    NegInfinity,
}

/// A debuggee value as it crosses the bridge: an object handle id vended
/// by the paused child, a special marker, or a JSON primitive wrapped as
/// `{"primitive": ...}`. Object id 0 encodes "no object".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsValue {
    Object { object: u32 },
    Special { special: SpecialValue },
    Primitive { primitive: serde_json::Value },
}

impl JsValue {
    pub fn undefined() -> Self {
        JsValue::Special {
            special: SpecialValue::Undefined,
        }
    }

    pub fn object(id: u32) -> Self {
        JsValue::Object { object: id }
    }

    /// Encode a float, diverting the values JSON has no literal for.
    pub fn number(value: f64) -> Self {
        if value.is_nan() {
            JsValue::Special {
                special: SpecialValue::NaN,
            }
        } else if value == f64::INFINITY {
            JsValue::Special {
                special: SpecialValue::Infinity,
            }
        } else if value == f64::NEG_INFINITY {
            JsValue::Special {
                special: SpecialValue::NegInfinity,
            }
        } else {
            JsValue::Primitive {
                primitive: serde_json::json!(value),
            }
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        JsValue::Primitive {
            primitive: serde_json::Value::String(value.into()),
        }
    }

    /// The object id, if this is an object reference with a real id.
    pub fn object_id(&self) -> Option<u32> {
        match self {
            JsValue::Object { object } if *object != 0 => Some(*object),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_forms_match_the_protocol() {
        assert_eq!(
            serde_json::to_string(&JsValue::object(7)).unwrap(),
            r#"{"object":7}"#
        );
        assert_eq!(
            serde_json::to_string(&JsValue::undefined()).unwrap(),
            r#"{"special":"undefined"}"#
        );
        assert_eq!(
            serde_json::to_string(&JsValue::number(f64::NEG_INFINITY)).unwrap(),
            r#"{"special":"-Infinity"}"#
        );
        assert_eq!(
            serde_json::to_string(&JsValue::number(3.5)).unwrap(),
            r#"{"primitive":3.5}"#
        );
        assert_eq!(
            serde_json::to_string(&JsValue::string("hi")).unwrap(),
            r#"{"primitive":"hi"}"#
        );
    }

    #[test]
    fn untagged_decoding_picks_the_right_variant() {
        let v: JsValue = serde_json::from_str(r#"{"object":12}"#).unwrap();
        assert_eq!(v, JsValue::object(12));
        let v: JsValue = serde_json::from_str(r#"{"special":"NaN"}"#).unwrap();
        assert_eq!(
            v,
            JsValue::Special {
                special: SpecialValue::NaN
            }
        );
        let v: JsValue = serde_json::from_str(r#"{"primitive":true}"#).unwrap();
        assert_eq!(
            v,
            JsValue::Primitive {
                primitive: serde_json::json!(true)
            }
        );
    }

    #[test]
    fn object_id_zero_is_a_miss() {
        assert_eq!(JsValue::object(0).object_id(), None);
        assert_eq!(JsValue::object(3).object_id(), Some(3));
    }
}
