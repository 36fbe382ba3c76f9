//! 展开后的内容到 Cloud API 消息体的映射

use serde_json::Value;

use crate::event::{ContactCard, ExternalAdReply, MediaMessage, MessageContent};
use crate::payload::{
    ButtonReply, ContactName, ContactPhone, Interactive, InteractiveReply, Location, MediaRef,
    MessageBody, Referral, SharedContact,
};

/// 映射结果
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    Body(MessageBody),
    /// 无法映射，降级为带诊断标题的 failed 状态
    Failed(String),
}

/// 把展开后的内容映射为消息体
///
/// 媒体失去二进制引用但保留了说明文字时降级为文本；两者都没有则降级为 failed。
pub fn map_content(media_id: &str, content: &MessageContent) -> Mapped {
    if let Some(text) = content.conversation.as_deref() {
        return Mapped::Body(MessageBody::text(text));
    }
    if let Some(extended) = &content.extended_text_message {
        return Mapped::Body(MessageBody::text(extended.text.clone().unwrap_or_default()));
    }

    if let Some((kind, media)) = content.media() {
        return map_media(media_id, kind, media);
    }

    if let Some(location) = content
        .location_message
        .as_ref()
        .or(content.live_location_message.as_ref())
    {
        return Mapped::Body(MessageBody::Location {
            location: Location {
                latitude: location.degrees_latitude,
                longitude: location.degrees_longitude,
                name: location.name.clone(),
                address: location.address.clone(),
            },
        });
    }

    if let Some(card) = &content.contact_message {
        return Mapped::Body(MessageBody::Contacts {
            contacts: vec![shared_contact(card)],
        });
    }
    if let Some(array) = &content.contacts_array_message {
        return Mapped::Body(MessageBody::Contacts {
            contacts: array.contacts.iter().map(shared_contact).collect(),
        });
    }

    if let Some(reply) = &content.buttons_response_message {
        let text = reply.selected_display_text.clone().unwrap_or_default();
        return Mapped::Body(MessageBody::Button {
            button: ButtonReply {
                payload: reply.selected_button_id.clone().unwrap_or_else(|| text.clone()),
                text,
            },
        });
    }
    if let Some(reply) = &content.template_button_reply_message {
        let text = reply.selected_display_text.clone().unwrap_or_default();
        return Mapped::Body(MessageBody::Button {
            button: ButtonReply {
                payload: reply.selected_id.clone().unwrap_or_else(|| text.clone()),
                text,
            },
        });
    }
    if let Some(reply) = &content.list_response_message {
        let id = reply
            .single_select_reply
            .as_ref()
            .and_then(|select| select.selected_row_id.clone())
            .unwrap_or_default();
        return Mapped::Body(MessageBody::Interactive {
            interactive: Interactive::ListReply {
                list_reply: InteractiveReply {
                    id,
                    title: reply.title.clone().unwrap_or_default(),
                    description: reply.description.clone(),
                },
            },
        });
    }

    let unknown = content.unknown_types();
    if unknown.is_empty() {
        Mapped::Failed("Message without content".to_string())
    } else {
        Mapped::Failed(format!("Unsupported message type: {}", unknown.join(", ")))
    }
}

fn map_media(media_id: &str, kind: &'static str, media: &MediaMessage) -> Mapped {
    if !media.has_binary_reference() {
        return match media.caption_text() {
            Some(caption) => Mapped::Body(MessageBody::text(caption)),
            None => Mapped::Failed(format!("Media message ({kind}) lost its content")),
        };
    }

    let mime_type = media
        .mimetype
        .clone()
        .unwrap_or_else(|| default_mime(kind).to_string());
    let media_ref = MediaRef {
        id: media_id.to_string(),
        mime_type,
        sha256: media.file_sha256.clone(),
        caption: media.caption_text().map(str::to_string),
        filename: media.file_name.clone().filter(|_| kind == "document"),
        voice: media.ptt.filter(|_| kind == "audio"),
    };

    Mapped::Body(match kind {
        "image" => MessageBody::Image { image: media_ref },
        "video" => MessageBody::Video { video: media_ref },
        "audio" => MessageBody::Audio { audio: media_ref },
        "sticker" => MessageBody::Sticker { sticker: media_ref },
        _ => MessageBody::Document { document: media_ref },
    })
}

fn default_mime(kind: &str) -> &'static str {
    match kind {
        "image" => "image/jpeg",
        "video" => "video/mp4",
        "audio" => "audio/ogg",
        "sticker" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn shared_contact(card: &ContactCard) -> SharedContact {
    let vcard = card.vcard.as_deref().unwrap_or_default();
    let formatted_name = card
        .display_name
        .clone()
        .or_else(|| vcard_field(vcard, "FN"))
        .unwrap_or_default();
    SharedContact {
        name: ContactName { formatted_name },
        phones: vcard_phones(vcard),
    }
}

fn vcard_field(vcard: &str, name: &str) -> Option<String> {
    vcard.lines().find_map(|line| {
        let (field, value) = line.split_once(':')?;
        (field.split(';').next()? == name).then(|| value.trim().to_string())
    })
}

/// `TEL;type=CELL;waid=5511988887777:+55 11 98888-7777`
fn vcard_phones(vcard: &str) -> Vec<ContactPhone> {
    vcard
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (field, value) = line.split_once(':')?;
            let mut params = field.split(';');
            let tag = params.next()?;
            // 带分组前缀的写法：item1.TEL
            if !tag.rsplit('.').next()?.eq_ignore_ascii_case("TEL") {
                return None;
            }
            let mut wa_id = None;
            let mut kind = "CELL".to_string();
            for param in params {
                match param.split_once('=') {
                    Some((key, val)) if key.eq_ignore_ascii_case("waid") => {
                        wa_id = Some(val.to_string())
                    }
                    Some((key, val)) if key.eq_ignore_ascii_case("type") => {
                        kind = val.to_ascii_uppercase()
                    }
                    _ => {}
                }
            }
            Some(ContactPhone {
                phone: value.trim().to_string(),
                wa_id,
                kind,
            })
        })
        .collect()
}

/// 广告回复 → referral
pub fn referral_from(reply: &ExternalAdReply) -> Referral {
    let media_type = reply.media_type.as_ref().and_then(|value| match value {
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some("image".to_string()),
            Some(2) => Some("video".to_string()),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "IMAGE" => Some("image".to_string()),
            "VIDEO" => Some("video".to_string()),
            "NONE" => None,
            other => Some(other.to_ascii_lowercase()),
        },
        _ => None,
    });
    Referral {
        source_url: reply.source_url.clone(),
        source_id: reply.source_id.clone(),
        source_type: reply.source_type.clone(),
        headline: reply.title.clone(),
        body: reply.body.clone(),
        media_type,
        thumbnail_url: reply.thumbnail_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ListResponse, SingleSelectReply};
    use serde_json::json;

    fn content(value: serde_json::Value) -> MessageContent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn media_without_reference_demotes_to_caption() {
        let mapped = map_content(
            "s/1",
            &content(json!({ "imageMessage": { "caption": "hello", "mimetype": "image/jpeg" } })),
        );
        assert_eq!(mapped, Mapped::Body(MessageBody::text("hello")));
    }

    #[test]
    fn media_without_reference_or_caption_fails() {
        let mapped = map_content("s/1", &content(json!({ "videoMessage": {} })));
        assert!(matches!(mapped, Mapped::Failed(title) if title.contains("video")));
    }

    #[test]
    fn media_with_reference_is_a_media_ref() {
        let mapped = map_content(
            "5511900000000/01HX",
            &content(json!({ "audioMessage": {
                "url": "https://mmg.whatsapp.net/x", "mimetype": "audio/ogg; codecs=opus", "ptt": true
            } })),
        );
        let Mapped::Body(MessageBody::Audio { audio }) = mapped else {
            panic!("expected audio, got {mapped:?}");
        };
        assert_eq!(audio.id, "5511900000000/01HX");
        assert_eq!(audio.voice, Some(true));
        assert_eq!(audio.caption, None);
    }

    #[test]
    fn unknown_types_produce_diagnostic_title() {
        let mapped = map_content("s/1", &content(json!({ "pollCreationMessageV3": { "name": "?" } })));
        assert_eq!(
            mapped,
            Mapped::Failed("Unsupported message type: pollCreationMessageV3".into())
        );
    }

    #[test]
    fn vcard_phones_are_extracted() {
        let card = ContactCard {
            display_name: None,
            vcard: Some(
                "BEGIN:VCARD\nVERSION:3.0\nFN:Ana\nitem1.TEL;waid=5511988887777:+55 11 98888-7777\nEND:VCARD"
                    .into(),
            ),
            context_info: None,
        };
        let contact = shared_contact(&card);
        assert_eq!(contact.name.formatted_name, "Ana");
        assert_eq!(contact.phones.len(), 1);
        assert_eq!(contact.phones[0].wa_id.as_deref(), Some("5511988887777"));
    }

    #[test]
    fn list_reply_maps_to_interactive() {
        let mapped = map_content(
            "s/1",
            &MessageContent {
                list_response_message: Some(ListResponse {
                    title: Some("Plan B".into()),
                    description: None,
                    single_select_reply: Some(SingleSelectReply {
                        selected_row_id: Some("row-2".into()),
                    }),
                    context_info: None,
                }),
                ..MessageContent::default()
            },
        );
        assert!(matches!(
            mapped,
            Mapped::Body(MessageBody::Interactive { interactive: Interactive::ListReply { ref list_reply } })
                if list_reply.id == "row-2"
        ));
    }
}
