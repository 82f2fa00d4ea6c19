//! Mapping between wire content and stored message bodies.

use tessera_core::MessageBody;
use tessera_proto::MessageContent;

use crate::config::ClientConfig;

const REDACTED_PREVIEW: &str = "New message";

/// Persisted form of `content`, or `None` for ephemeral call signalling.
pub(crate) fn stored_body(content: &MessageContent, thumbnail: Option<Vec<u8>>) -> Option<MessageBody> {
    let body = match content {
        MessageContent::Text { body } => MessageBody::Text { body: body.clone() },
        MessageContent::Photo { identifier, url } => MessageBody::Photo {
            identifier: identifier.clone(),
            url: url.clone(),
            thumbnail,
        },
        MessageContent::Voice { identifier, duration, url } => MessageBody::Voice {
            identifier: identifier.clone(),
            duration: *duration,
            url: url.clone(),
        },
        MessageContent::CallOffer { sdp } => MessageBody::Call { sdp: sdp.clone() },
        MessageContent::CallAnswer { .. } | MessageContent::IceCandidate { .. } => return None,
    };
    Some(body)
}

/// Text for a local push about `content`.
pub(crate) fn push_preview(config: &ClientConfig, content: &MessageContent) -> String {
    if config.redact_previews {
        return REDACTED_PREVIEW.to_string();
    }
    match content {
        MessageContent::Text { body } => truncate(body, config.preview_max_chars),
        MessageContent::Photo { .. } => "Photo".to_string(),
        MessageContent::Voice { .. } => "Voice message".to_string(),
        MessageContent::CallOffer { .. } => "Incoming call".to_string(),
        MessageContent::CallAnswer { .. } | MessageContent::IceCandidate { .. } => {
            REDACTED_PREVIEW.to_string()
        },
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_content_has_no_body() {
        let ice = MessageContent::IceCandidate { sdp: "c".into(), line_index: 0, mid: None };
        assert_eq!(stored_body(&ice, None), None);
        assert_eq!(
            stored_body(&MessageContent::CallOffer { sdp: "o".into() }, None),
            Some(MessageBody::Call { sdp: "o".into() })
        );
    }

    #[test]
    fn photo_keeps_thumbnail() {
        let photo = MessageContent::Photo { identifier: "p".into(), url: "u".into() };
        let Some(MessageBody::Photo { thumbnail, .. }) = stored_body(&photo, Some(vec![7])) else {
            panic!("expected photo body");
        };
        assert_eq!(thumbnail, Some(vec![7]));
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        let config = ClientConfig { preview_max_chars: 3, ..ClientConfig::default() };
        assert_eq!(push_preview(&config, &MessageContent::text("héllo")), "hél…");
        assert_eq!(push_preview(&config, &MessageContent::text("hé")), "hé");
    }

    #[test]
    fn redaction_hides_everything() {
        let config = ClientConfig { redact_previews: true, ..ClientConfig::default() };
        assert_eq!(push_preview(&config, &MessageContent::text("secret")), REDACTED_PREVIEW);
    }
}
