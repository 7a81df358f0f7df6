use crate::error::GameError;
use crate::types::PlayerId;
use serde_json::Value;

/// Where a player's photo should come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoRef {
    /// Already fetchable, used as-is.
    Url(String),
    /// Opaque Telegram file id that needs a `getFile` round trip.
    FileId(String),
    Absent,
}

impl PhotoRef {
    fn classify(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => PhotoRef::Absent,
            Some(s) if s.starts_with("https://") || s.starts_with("http://") => {
                PhotoRef::Url(s.to_string())
            }
            Some(s) => PhotoRef::FileId(s.to_string()),
        }
    }
}

/// Identity fields pulled out of any supported payload shape.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundIdentity {
    pub id: PlayerId,
    pub name: Option<String>,
    pub photo: PhotoRef,
    pub points: Option<u64>,
}

/// The payload shapes clients actually send.
enum PayloadShape<'a> {
    /// `{id, name?, imageUrl?, points?}` posted by the web client.
    Flat(&'a Value),
    /// Telegram `{from, photo?}`, optionally wrapped as an update's `message`.
    Sender { envelope: &'a Value, from: &'a Value },
}

impl<'a> PayloadShape<'a> {
    fn detect(payload: &'a Value) -> Self {
        let envelope = match payload.get("message") {
            Some(message) if message.is_object() => message,
            _ => payload,
        };

        match envelope.get("from") {
            Some(from) if from.is_object() => PayloadShape::Sender { envelope, from },
            _ => PayloadShape::Flat(payload),
        }
    }
}

/// Normalizes an inbound payload.
///
/// Only a missing id is an error; every other field is optional and anything
/// malformed is treated as absent.
pub fn normalize(payload: &Value) -> Result<InboundIdentity, GameError> {
    match PayloadShape::detect(payload) {
        PayloadShape::Flat(body) => {
            let id = player_id(body.get("id"))
                .or_else(|| player_id(body.get("user_id")))
                .ok_or(GameError::MissingIdentifier)?;

            let image = text(body, "imageUrl")
                .or_else(|| text(body, "image_url"))
                .or_else(|| text(body, "photo_url"));
            let photo = match largest_photo(body) {
                Some(file_id) => PhotoRef::FileId(file_id),
                None => PhotoRef::classify(image.as_deref()),
            };

            Ok(InboundIdentity {
                id,
                name: text(body, "name").or_else(|| text(body, "first_name")),
                photo,
                points: body.get("points").and_then(Value::as_u64),
            })
        }
        PayloadShape::Sender { envelope, from } => {
            let id = player_id(from.get("id")).ok_or(GameError::MissingIdentifier)?;

            Ok(InboundIdentity {
                id,
                name: text(envelope, "name")
                    .or_else(|| text(from, "first_name"))
                    .or_else(|| text(from, "username")),
                photo: largest_photo(envelope)
                    .map(PhotoRef::FileId)
                    .unwrap_or(PhotoRef::Absent),
                points: None,
            })
        }
    }
}

fn player_id(value: Option<&Value>) -> Option<PlayerId> {
    value.and_then(|v| serde_json::from_value::<PlayerId>(v.clone()).ok())
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Telegram lists photo sizes smallest first.
fn largest_photo(envelope: &Value) -> Option<String> {
    envelope
        .get("photo")
        .and_then(Value::as_array)?
        .iter()
        .rev()
        .find_map(|size| text(size, "file_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_shape() {
        let identity = normalize(&json!({
            "id": 7,
            "name": "Omar",
            "imageUrl": "https://cdn.example.com/omar.png",
            "points": 1500
        }))
        .unwrap();

        assert_eq!(identity.id, PlayerId::from(7));
        assert_eq!(identity.name.as_deref(), Some("Omar"));
        assert_eq!(
            identity.photo,
            PhotoRef::Url("https://cdn.example.com/omar.png".to_string())
        );
        assert_eq!(identity.points, Some(1500));
    }

    #[test]
    fn test_sender_shape() {
        let identity = normalize(&json!({"from": {"id": 42, "first_name": "Aya"}})).unwrap();
        assert_eq!(identity.id, PlayerId::from(42));
        assert_eq!(identity.name.as_deref(), Some("Aya"));
        assert_eq!(identity.photo, PhotoRef::Absent);
        assert_eq!(identity.points, None);
    }

    #[test]
    fn test_update_envelope_picks_largest_photo() {
        let identity = normalize(&json!({
            "update_id": 1001,
            "message": {
                "from": {"id": 42, "username": "aya_m"},
                "photo": [
                    {"file_id": "small", "width": 90},
                    {"file_id": "large", "width": 1280}
                ]
            }
        }))
        .unwrap();

        assert_eq!(identity.name.as_deref(), Some("aya_m"));
        assert_eq!(identity.photo, PhotoRef::FileId("large".to_string()));
    }

    #[test]
    fn test_missing_identifier() {
        assert_eq!(
            normalize(&json!({"name": "nobody"})).unwrap_err(),
            GameError::MissingIdentifier
        );
        assert_eq!(
            normalize(&json!({"from": {"first_name": "Aya"}})).unwrap_err(),
            GameError::MissingIdentifier
        );
        assert_eq!(normalize(&json!({"id": ""})).unwrap_err(), GameError::MissingIdentifier);
        assert_eq!(normalize(&json!(null)).unwrap_err(), GameError::MissingIdentifier);
    }

    #[test]
    fn test_malformed_optional_fields_are_ignored() {
        let identity = normalize(&json!({
            "id": "abc",
            "name": 12,
            "imageUrl": 5,
            "points": -40
        }))
        .unwrap();

        assert_eq!(identity.name, None);
        assert_eq!(identity.photo, PhotoRef::Absent);
        assert_eq!(identity.points, None);

        let identity = normalize(&json!({
            "from": {"id": 1},
            "photo": "not-a-list"
        }))
        .unwrap();
        assert_eq!(identity.photo, PhotoRef::Absent);

        let identity = normalize(&json!({"from": {"id": 1}, "photo": [{}]})).unwrap();
        assert_eq!(identity.photo, PhotoRef::Absent);
    }

    #[test]
    fn test_non_url_image_is_a_file_reference() {
        let identity = normalize(&json!({"id": 3, "image_url": "AgACAgIAAxkBAAIB"})).unwrap();
        assert_eq!(identity.photo, PhotoRef::FileId("AgACAgIAAxkBAAIB".to_string()));
    }
}
