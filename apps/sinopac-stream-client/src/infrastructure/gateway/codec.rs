//! Gateway Codec
//!
//! Stateless encoding and decoding for the gateway wire format.
//!
//! - **Outbound**: always JSON text. The envelope is stamped with the
//!   protocol version, sequence number, session token and a
//!   `YYYYMMDDHHMMSS` timestamp inside `data`.
//! - **Inbound**: text frames are plain JSON; binary frames are gzip
//!   compressed UTF-8 JSON and are inflated before parsing.

use std::io::Read;

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use serde::Serialize;
use serde_json::Value;

use crate::domain::market_data::{QuoteFragment, decimal_from_value};
use crate::infrastructure::config::DeviceIdentity;
use crate::infrastructure::gateway::messages::{
    ApiKind, AuthParams, CodeParams, GatewayMessage, GatewayRequest, HeartbeatParams,
    InboundEnvelope, Payload, PushParams, StatusCode,
};

/// Wire timestamp format for `data.time`.
pub const WIRE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Envelope keys that are never instrument fields.
const ENVELOPE_KEYS: &[&str] = &["rc", "msg", "time", "sn"];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary payload is not a valid gzip stream.
    #[error("gzip inflate error: {0}")]
    Inflate(#[source] std::io::Error),

    /// Inflated payload is not UTF-8.
    #[error("inflated payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Raw frame as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Plain JSON text.
    Text(String),
    /// Gzip-compressed JSON.
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Frame encoding label for metrics.
    #[must_use]
    pub const fn encoding(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "gzip",
        }
    }
}

/// Per-request values stamped into the outbound envelope.
#[derive(Debug, Clone, Copy)]
pub struct Stamp<'a> {
    /// Sequence number.
    pub sn: u64,
    /// Session token (ignored for auth).
    pub token: Option<&'a str>,
    /// `apiver` field.
    pub api_version: &'a str,
    /// Device fingerprint (auth only).
    pub identity: &'a DeviceIdentity,
    /// Local wall-clock time.
    pub time: NaiveDateTime,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    api: &'static str,
    apiver: &'a str,
    sn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(flatten)]
    identity: Option<&'a DeviceIdentity>,
    data: DataEnvelope<'a>,
}

#[derive(Serialize)]
struct DataEnvelope<'a> {
    time: String,
    #[serde(flatten)]
    params: ParamsRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ParamsRef<'a> {
    Auth(&'a AuthParams),
    Code(&'a CodeParams),
    Push(&'a PushParams),
    Empty(HeartbeatParams),
}

/// JSON + gzip codec for the quote gateway.
#[derive(Debug, Default, Clone)]
pub struct GatewayCodec;

impl GatewayCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a request into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, request: &GatewayRequest, stamp: Stamp<'_>) -> Result<String, CodecError> {
        let (token, identity, params) = match request {
            GatewayRequest::Auth(p) => (None, Some(stamp.identity), ParamsRef::Auth(p)),
            GatewayRequest::Heartbeat => (stamp.token, None, ParamsRef::Empty(HeartbeatParams {})),
            GatewayRequest::Quote(p) | GatewayRequest::Trend(p) => {
                (stamp.token, None, ParamsRef::Code(p))
            }
            GatewayRequest::Push(p) => (stamp.token, None, ParamsRef::Push(p)),
        };

        let envelope = OutboundEnvelope {
            api: request.kind().as_str(),
            apiver: stamp.api_version,
            sn: stamp.sn,
            token,
            identity,
            data: DataEnvelope {
                time: stamp.time.format(WIRE_TIME_FORMAT).to_string(),
                params,
            },
        };

        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decode a transport frame, inflating binary payloads first.
    ///
    /// # Errors
    ///
    /// Returns an error if inflation, UTF-8 conversion or parsing fails.
    pub fn decode(&self, frame: &InboundFrame) -> Result<GatewayMessage, CodecError> {
        match frame {
            InboundFrame::Text(text) => self.decode_text(text),
            InboundFrame::Binary(bytes) => self.decode_text(&self.inflate(bytes)?),
        }
    }

    /// Inflate a gzip payload to text.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not gzip or not UTF-8.
    pub fn inflate(&self, bytes: &[u8]) -> Result<String, CodecError> {
        let mut decoder = GzDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).map_err(CodecError::Inflate)?;
        Ok(String::from_utf8(raw)?)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON envelope.
    pub fn decode_text(&self, text: &str) -> Result<GatewayMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let envelope: InboundEnvelope = serde_json::from_str(trimmed)?;
        let kind = ApiKind::from_wire(&envelope.api);
        let status = envelope.data.get("rc").and_then(status_code);

        let payload = match kind {
            Some(ApiKind::Auth) => Payload::Auth {
                token: envelope
                    .data
                    .get("token")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(ToString::to_string),
            },
            Some(ApiKind::Quote | ApiKind::Sync) => decode_fragments(&envelope.data),
            Some(ApiKind::Trend) => decode_trend(&envelope.data),
            _ => Payload::Ack,
        };

        Ok(GatewayMessage {
            api: envelope.api,
            kind,
            sn: envelope.sn,
            status,
            payload,
        })
    }
}

/// `rc` may arrive as `"000"` or as the number `0`.
fn status_code(value: &Value) -> Option<StatusCode> {
    match value {
        Value::String(s) => Some(StatusCode::from_wire(s)),
        Value::Number(n) => n.as_u64().map(|n| StatusCode::from_wire(&format!("{n:03}"))),
        _ => None,
    }
}

/// Instruments are decoded one by one; an item that does not parse is
/// reported in `rejected` and never costs the rest of the frame.
fn decode_fragments(data: &Value) -> Payload {
    let list = data
        .get("trendItems")
        .or_else(|| data.get("items"))
        .and_then(Value::as_array);

    let mut fragments = Vec::new();
    let mut rejected = Vec::new();

    let mut accept = |index: usize, item: &Value| match fragment_from(item) {
        Ok(fragment) if carries_fields(&fragment) => fragments.push(fragment),
        Ok(_) => {}
        Err(e) => rejected.push(format!("item {index}: {e}")),
    };

    match list {
        Some(items) => {
            for (index, item) in items.iter().enumerate() {
                accept(index, item);
            }
        }
        None if data.is_object() => accept(0, data),
        None => {}
    }

    Payload::Quotes {
        fragments,
        rejected,
    }
}

fn fragment_from(value: &Value) -> Result<QuoteFragment, serde_json::Error> {
    let mut fragment = QuoteFragment::from_value(value)?;
    for key in ENVELOPE_KEYS {
        fragment.extra.remove(*key);
    }
    Ok(fragment)
}

fn carries_fields(fragment: &QuoteFragment) -> bool {
    fragment.price.is_some()
        || fragment.change_percent.is_some()
        || fragment.volume.is_some()
        || !fragment.extra.is_empty()
        || !fragment.code.is_empty()
}

fn decode_trend(data: &Value) -> Payload {
    let code = data
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut closes = Vec::new();
    let mut skipped = 0;

    let items = data
        .get("trendItems")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    for item in items {
        let raw = if item.is_object() {
            item.get("close")
                .or_else(|| item.get("closePrice"))
                .or_else(|| item.get("c"))
        } else {
            Some(item)
        };

        match raw.and_then(decimal_from_value) {
            Some(close) => closes.push(close),
            None => skipped += 1,
        }
    }

    Payload::Trend {
        code,
        closes,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market_data::Market;
    use crate::infrastructure::config::PermissionFlag;
    use crate::infrastructure::gateway::messages::PushMode;

    fn stamp(identity: &DeviceIdentity, sn: u64) -> Stamp<'_> {
        Stamp {
            sn,
            token: Some("T1"),
            api_version: "1.0",
            identity,
            time: NaiveDate::from_ymd_opt(2025, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30, 5)
                .unwrap(),
        }
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn encode_quote_carries_token_and_time() {
        let identity = DeviceIdentity::default();
        let codec = GatewayCodec::new();
        let text = codec
            .encode(&GatewayRequest::quote("AAPL.US"), stamp(&identity, 5))
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["api"], "quote");
        assert_eq!(value["apiver"], "1.0");
        assert_eq!(value["sn"], 5);
        assert_eq!(value["token"], "T1");
        assert_eq!(value["data"]["time"], "20250102093005");
        assert_eq!(value["data"]["code"], "AAPL.US");
        assert!(value.get("pid").is_none());
    }

    #[test]
    fn encode_auth_omits_token_and_injects_identity() {
        let identity = DeviceIdentity::default();
        let codec = GatewayCodec::new();
        let request = GatewayRequest::Auth(AuthParams {
            auth_key: String::new(),
            us: PermissionFlag::RealTime,
            hk: PermissionFlag::None,
            tw: PermissionFlag::Delayed,
        });
        let value: Value =
            serde_json::from_str(&codec.encode(&request, stamp(&identity, 1)).unwrap()).unwrap();

        assert_eq!(value["api"], "auth");
        assert!(value.get("token").is_none());
        assert_eq!(value["pid"], "SNPW");
        assert_eq!(value["type"], "SEC");
        assert_eq!(value["data"]["US"], "r");
        assert_eq!(value["data"]["HK"], "n");
        assert_eq!(value["data"]["TW"], "d");
        assert_eq!(value["data"]["auth_key"], "");
    }

    #[test]
    fn encode_heartbeat_and_push() {
        let identity = DeviceIdentity::default();
        let codec = GatewayCodec::new();

        let hb: Value = serde_json::from_str(
            &codec
                .encode(&GatewayRequest::Heartbeat, stamp(&identity, 3))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(hb["api"], "hb");
        assert_eq!(hb["token"], "T1");
        assert_eq!(hb["data"].as_object().unwrap().len(), 1);

        let push = GatewayRequest::push(
            Market::Hk,
            PushMode::Replace,
            vec!["0700.HK".to_string()],
        );
        let value: Value =
            serde_json::from_str(&codec.encode(&push, stamp(&identity, 4)).unwrap()).unwrap();
        assert_eq!(value["data"]["qtype"], "HK");
        assert_eq!(value["data"]["reset"], "y");
        assert_eq!(value["data"]["codes"][0], "0700.HK");
    }

    #[test]
    fn decode_auth_success() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(r#"{"api":"auth","sn":1,"data":{"rc":"000","token":"T1"}}"#)
            .unwrap();

        assert!(msg.is_auth());
        assert_eq!(msg.sn, Some(1));
        assert_eq!(msg.status, Some(StatusCode::Success));
        assert_eq!(
            msg.payload,
            Payload::Auth {
                token: Some("T1".to_string())
            }
        );
    }

    #[test]
    fn decode_numeric_rc() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(r#"{"api":"quote","sn":2,"data":{"rc":408}}"#)
            .unwrap();
        assert_eq!(msg.status, Some(StatusCode::Timeout));
        assert_eq!(
            msg.payload,
            Payload::Quotes {
                fragments: vec![],
                rejected: vec![],
            }
        );
    }

    #[test]
    fn decode_quote_list_strips_envelope_keys() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(
                r#"{"api":"quote","sn":5,"data":{"rc":"000","time":"20250102093005",
                    "trendItems":[{"code":"AAPL.US","closePrice":"189.50","limitUpDown":"+1.2","name":"Apple"}]}}"#,
            )
            .unwrap();

        let Payload::Quotes { fragments, .. } = msg.payload else {
            panic!("expected quotes");
        };
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].code, "AAPL.US");
        assert_eq!(fragments[0].price, Some(Decimal::new(18950, 2)));
        assert_eq!(fragments[0].change_percent, Some(Decimal::new(12, 1)));
        assert!(fragments[0].extra.contains_key("name"));
        assert!(!fragments[0].extra.contains_key("time"));
    }

    #[test]
    fn decode_quote_list_keeps_good_items_around_a_bad_one() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(
                r#"{"api":"sync","data":{"trendItems":[
                    {"code":"AAPL.US","price":"190.1","closePrice":"188.0","limitUpDown":"1","changePercent":"1"},
                    {"code":42,"price":"1"},
                    "noise",
                    {"code":"NVDA.US","price":"120"}
                ]}}"#,
            )
            .unwrap();

        let Payload::Quotes {
            fragments,
            rejected,
        } = msg.payload
        else {
            panic!("expected quotes");
        };
        let codes: Vec<_> = fragments.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, ["AAPL.US", "NVDA.US"]);
        assert_eq!(fragments[0].price, Some(Decimal::new(1901, 1)));
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].starts_with("item 1"));
    }

    #[test]
    fn undecodable_quote_body_keeps_envelope() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(r#"{"api":"quote","sn":2,"data":{"rc":"408","code":["AAPL.US"]}}"#)
            .unwrap();

        assert_eq!(msg.sn, Some(2));
        assert_eq!(msg.status, Some(StatusCode::Timeout));
        assert!(matches!(msg.payload, Payload::Quotes { ref rejected, .. } if rejected.len() == 1));
    }

    #[test]
    fn decode_sync_single_object() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(r#"{"api":"sync","data":{"code":"0700.HK","price":"380.2","volume":12000}}"#)
            .unwrap();

        assert_eq!(msg.sn, None);
        assert_eq!(msg.status, None);
        assert!(msg.is_success_or_unsigned());
        let Payload::Quotes { fragments, .. } = msg.payload else {
            panic!("expected quotes");
        };
        assert_eq!(fragments[0].volume, Some(Decimal::new(12000, 0)));
    }

    #[test]
    fn decode_trend_skips_unparsable_closes() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(
                r#"{"api":"trend","sn":6,"data":{"rc":"000","code":"AAPL.US",
                    "trendItems":[{"close":"188.1"},{"close":"--"},{"close":"189.0"},"190.5"]}}"#,
            )
            .unwrap();

        assert_eq!(
            msg.payload,
            Payload::Trend {
                code: "AAPL.US".to_string(),
                closes: vec![
                    Decimal::new(1881, 1),
                    Decimal::new(1890, 1),
                    Decimal::new(1905, 1)
                ],
                skipped: 1,
            }
        );
    }

    #[test]
    fn decode_binary_gzip_frame() {
        let codec = GatewayCodec::new();
        let frame = InboundFrame::Binary(gzip(
            r#"{"api":"sync","data":{"items":[{"code":"NVDA.US","price":"120"}]}}"#,
        ));
        let msg = codec.decode(&frame).unwrap();
        assert_eq!(msg.kind, Some(ApiKind::Sync));
        assert_eq!(frame.encoding(), "gzip");
    }

    #[test]
    fn invalid_gzip_is_an_error() {
        let codec = GatewayCodec::new();
        let frame = InboundFrame::Binary(b"definitely not gzip".to_vec());
        assert!(matches!(codec.decode(&frame), Err(CodecError::Inflate(_))));
    }

    #[test]
    fn non_object_text_is_an_error() {
        let codec = GatewayCodec::new();
        assert!(matches!(
            codec.decode_text("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            codec.decode_text("{not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn unknown_api_decodes_as_ack() {
        let codec = GatewayCodec::new();
        let msg = codec
            .decode_text(r#"{"api":"news","sn":9,"data":{"rc":"000"}}"#)
            .unwrap();
        assert_eq!(msg.kind, None);
        assert_eq!(msg.payload, Payload::Ack);
    }
}
