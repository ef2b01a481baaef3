//! Tests for adchoices-core: types, wire protocol, codec, errors

use adchoices_core::codec;
use adchoices_core::*;

// ===========================================================================
// SessionId / FrameRef
// ===========================================================================

#[test]
fn session_id_display_and_serde() {
    let id = SessionId::new(12345678);
    assert_eq!(id.to_string(), "12345678");
    assert_eq!(serde_json::to_string(&id).unwrap(), "12345678");
    let back: SessionId = serde_json::from_str("12345678").unwrap();
    assert_eq!(back, id);
}

#[test]
fn frame_ref_display() {
    assert_eq!(FrameRef::new(3).to_string(), "frame#3");
}

// ===========================================================================
// RawItem / Registration
// ===========================================================================

#[test]
fn registration_ignores_unknown_fields() {
    let reg: Registration = serde_json::from_str(
        r#"{"domId":"oba1","title":"T","linkText":"L","url":"U","color":"red","usePopup":false}"#,
    )
    .unwrap();
    assert_eq!(reg.dom_id.as_deref(), Some("oba1"));
    assert_eq!(reg.item.title.as_deref(), Some("T"));
    assert_eq!(reg.item.use_popup, Some(false));
    let json = serde_json::to_string(&reg.item).unwrap();
    assert!(!json.contains("color"));
    assert!(!json.contains("domId"));
}

#[test]
fn raw_item_serializes_camel_case_and_skips_absent() {
    let item = RawItem::new("T", "L", "U").with_render_close_button(false);
    let json = serde_json::to_string(&item).unwrap();
    assert!(json.contains(r#""linkText":"L""#));
    assert!(json.contains(r#""renderCloseButton":false"#));
    assert!(!json.contains("header"));
    assert!(!json.contains("usePopup"));
}

#[test]
fn popup_and_close_opt_outs_need_explicit_false() {
    let item = RawItem::default();
    assert!(!item.opts_out_of_popup());
    assert!(!item.opts_out_of_close_button());
    let item = RawItem::default().with_use_popup(false).with_render_close_button(false);
    assert!(item.opts_out_of_popup());
    assert!(item.opts_out_of_close_button());
}

// ===========================================================================
// DisclosureItem validity
// ===========================================================================

#[test]
fn title_link_text_and_url_make_an_item_valid() {
    let item = DisclosureItem::from_raw(&RawItem::new("X", "Y", "Z")).unwrap();
    assert_eq!(item.title, "X");
    assert_eq!(item.link_text, "Y");
    assert_eq!(item.url, "Z");
    assert_eq!(item.text, None);
}

#[test]
fn missing_any_required_field_is_invalid_even_with_text() {
    let full = RawItem::new("X", "Y", "Z").with_text("some text");
    let mut no_title = full.clone();
    no_title.title = None;
    let mut no_link = full.clone();
    no_link.link_text = None;
    let mut no_url = full.clone();
    no_url.url = Some(String::new());
    for raw in [no_title, no_link, no_url] {
        assert!(!raw.is_valid());
        assert!(DisclosureItem::from_raw(&raw).is_none());
    }
    assert!(DisclosureItem::from_raw(&full).is_some());
}

#[test]
fn escaped_item_neutralises_markup() {
    let item = DisclosureItem::from_raw(&RawItem::new("<b>X</b>", "Y", "Z").with_text("a<b")).unwrap();
    let escaped = item.escaped();
    assert_eq!(escaped.title, "&lt;b&gt;X&lt;/b&gt;");
    assert_eq!(escaped.text.as_deref(), Some("a&lt;b"));
}

// ===========================================================================
// AccessClass / Position
// ===========================================================================

#[test]
fn access_class_display_and_messaging() {
    assert_eq!(AccessClass::SameOriginFriendly.to_string(), "FRIENDLY_IFRAME");
    assert_eq!(AccessClass::PostMessageRequired.to_string(), "POSTMESSAGE_SEARCH");
    assert_eq!(AccessClass::OpaqueForeign.to_string(), "FOREIGN_IFRAME");
    assert!(!AccessClass::SameOriginFriendly.needs_messaging());
    assert!(AccessClass::PostMessageRequired.needs_messaging());
    assert!(AccessClass::OpaqueForeign.needs_messaging());
}

#[test]
fn position_kebab_case() {
    assert_eq!(Position::default(), Position::TopRight);
    let p: Position = serde_json::from_str(r#""bottom-left""#).unwrap();
    assert_eq!(p, Position::BottomLeft);
    assert_eq!(p.to_string(), "bottom-left");
}

#[test]
fn player_options_parse_from_tag_arguments() {
    let opts: PlayerOptions =
        serde_json::from_str(r#"{"domId":"oba7","position":"top-left","renderCloseButton":false}"#).unwrap();
    assert_eq!(opts.dom_id.as_deref(), Some("oba7"));
    assert_eq!(opts.position, Some(Position::TopLeft));
    assert_eq!(opts.render_close_button, Some(false));
    assert_eq!(opts.use_popup, None);
}

// ===========================================================================
// Wire protocol
// ===========================================================================

#[test]
fn ack_envelope_shape() {
    let msg = WireMessage::pull_ack(SessionId::new(9), vec![RawItem::new("T", "L", "U")]);
    let value: serde_json::Value = serde_json::from_str(&msg.to_wire()).unwrap();
    assert_eq!(value["type"], "ADP.Registry.pullOBA_ACK");
    assert_eq!(value["data"]["id"], 9);
    assert_eq!(value["data"]["items"][0]["linkText"], "L");
}

#[test]
fn message_session_and_kind() {
    let id = SessionId::new(5);
    assert_eq!(WireMessage::unregister(id).session(), id);
    assert_eq!(WireMessage::unregister(id).kind(), "ADP.Registry.unRegOBA");
    let ack = WireMessage::parse(r#"{"type":"ADP.Registry.unRegOBA_ACK","data":{"id":5}}"#).unwrap();
    assert_eq!(ack.session(), id);
}

#[test]
fn malformed_envelopes_are_invalid_message() {
    for raw in [
        "",
        "{}",
        r#"{"type":"ADP.Registry.pullOBA"}"#,
        r#"{"type":"ADP.Registry.pullOBA","data":"abc"}"#,
        r#"{"type":"something.else","data":1}"#,
    ] {
        match WireMessage::parse(raw) {
            Err(Error::InvalidMessage(_)) => {}
            other => panic!("{raw:?} parsed as {other:?}"),
        }
    }
}

// ===========================================================================
// Codec
// ===========================================================================

#[test]
fn codec_token_is_base64_alphabet_only() {
    let token = codec::encode(&[RawItem::new("T", "L", "http://x/?a=1&b=2")]).unwrap();
    assert!(token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
}

#[test]
fn codec_empty_list() {
    let token = codec::encode(&[]).unwrap();
    assert_eq!(codec::decode(&token), Vec::<RawItem>::new());
}

#[test]
fn codec_strict_decode_reports_errors() {
    assert!(matches!(codec::try_decode("%%%"), Err(Error::Codec(_))));
    assert!(matches!(codec::try_decode("e30="), Err(Error::JsonError(_))));
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn error_display() {
    assert_eq!(
        Error::access_denied("location of frame#2").to_string(),
        "access denied: location of frame#2"
    );
    assert_eq!(
        Error::SessionNotFound(SessionId::new(3)).to_string(),
        "session not found: 3"
    );
    assert!(Error::access_denied("x").is_access_denied());
    assert!(!Error::invalid_message("x").is_access_denied());
}
