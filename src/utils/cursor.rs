use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Cursor helpers: encode/decode a (created_at, id) tuple into a base64 string.
/// Format used internally: "{created_at_rfc3339}|{uuid}" then base64 encoded.
pub fn encode(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}|{}", created_at.to_rfc3339(), id);
    URL_SAFE_NO_PAD.encode(raw)
}

pub fn decode(cursor: &str) -> Result<(DateTime<Utc>, Uuid), String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|e| format!("invalid cursor encoding: {}", e))?;
    let raw = String::from_utf8(bytes).map_err(|_| "cursor is not valid UTF-8".to_string())?;

    let (ts, id) = raw
        .split_once('|')
        .ok_or_else(|| "cursor is missing the separator".to_string())?;

    let created_at = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| format!("invalid cursor timestamp: {}", e))?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|e| format!("invalid cursor id: {}", e))?;

    Ok((created_at, id))
}
