//! 规范化器的单元测试

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::TenantConfig;
    use crate::correlator::MessageIdCorrelator;
    use crate::event::{EventKind, TransportEvent};
    use crate::identity::{IdentityCache, IdentityNormalizer};
    use crate::normalizer::{NameBook, NormalizedEvent, Normalizer, SessionScope};
    use crate::payload::{MessageBody, PayloadKind};
    use crate::status::DeliveryStatus;
    use crate::store::{KeySpace, MemoryStore};

    const SESSION: &str = "5511900000000";

    struct Fixture {
        normalizer: Normalizer,
        tenant: TenantConfig,
        names: NameBook,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let identity = IdentityCache::new(
                store.clone(),
                "bridge",
                Duration::from_secs(3600),
                IdentityNormalizer::from_names(&["br_ninth_digit"]),
            );
            let correlator =
                MessageIdCorrelator::new(store, KeySpace::default(), Duration::from_secs(3600));
            Self {
                normalizer: Normalizer::new(identity, correlator),
                tenant: TenantConfig::default(),
                names: NameBook::new(),
            }
        }

        async fn run(&self, value: serde_json::Value) -> Option<NormalizedEvent> {
            let event: TransportEvent = serde_json::from_value(value).unwrap();
            let scope = SessionScope {
                session: SESSION,
                tenant: &self.tenant,
                names: &self.names,
            };
            self.normalizer.normalize(&scope, &event).await
        }
    }

    #[tokio::test]
    async fn inbound_text_gets_minted_id_and_contact() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "551188887777@s.whatsapp.net", "id": "3EB0A1" },
                "message": { "conversation": "oi" },
                "messageTimestamp": 1700000000,
                "pushName": "Ana"
            }))
            .await
            .unwrap();

        let message = out.envelope.payload.message_ref().unwrap();
        // 第九位补齐
        assert_eq!(message.from, "5511988887777");
        assert_eq!(message.timestamp, "1700000000");
        assert_eq!(message.body, MessageBody::text("oi"));
        assert_ne!(message.id, "3EB0A1");
        assert_eq!(
            fx.normalizer
                .correlator()
                .lookup(SESSION, "3EB0A1")
                .await
                .as_deref(),
            Some(message.id.as_str())
        );

        let contact = &out.envelope.payload.change_value().unwrap().contacts[0];
        assert_eq!(contact.profile.name, "Ana");
        assert_eq!(contact.wa_id, "5511988887777");
        assert_eq!(out.envelope.meta.kind, PayloadKind::Message);
        assert!(out.status_change.is_none());
    }

    #[tokio::test]
    async fn device_only_sender_is_derived_and_recorded() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "99887766554433@lid", "id": "L1" },
                "message": { "conversation": "hi" }
            }))
            .await
            .unwrap();

        assert_eq!(out.envelope.payload.message_ref().unwrap().from, "99887766554433");
        assert_eq!(
            fx.normalizer
                .identity()
                .resolve_phone_for_device(SESSION, "99887766554433@lid")
                .await
                .as_deref(),
            Some("99887766554433")
        );
        assert_eq!(
            out.envelope.meta.device_forms,
            vec![("99887766554433".to_string(), "99887766554433@lid".to_string())]
        );
    }

    #[tokio::test]
    async fn explicit_phone_field_wins_and_is_learned() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": {
                    "remoteJid": "236395184570386@lid",
                    "senderPn": "5511977776666@s.whatsapp.net",
                    "id": "P1"
                },
                "message": { "conversation": "hi" }
            }))
            .await
            .unwrap();

        assert_eq!(out.envelope.payload.message_ref().unwrap().from, "5511977776666");
        assert_eq!(
            fx.normalizer
                .identity()
                .resolve_phone_for_device(SESSION, "236395184570386@lid")
                .await
                .as_deref(),
            Some("5511977776666")
        );
    }

    #[tokio::test]
    async fn edited_media_without_reference_becomes_caption_text() {
        let fx = Fixture::new();
        let original = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "ORIG" },
                "message": { "conversation": "helo" }
            }))
            .await
            .unwrap();
        let original_id = original.envelope.payload.message_ref().unwrap().id.clone();

        let out = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "EDIT1" },
                "message": { "editedMessage": { "message": { "protocolMessage": {
                    "type": 14,
                    "key": { "id": "ORIG" },
                    "editedMessage": { "imageMessage": { "caption": "hello", "mimetype": "image/jpeg" } }
                } } } }
            }))
            .await
            .unwrap();

        assert_eq!(
            out.kind,
            EventKind::Edit {
                target: "ORIG".into()
            }
        );
        let message = out.envelope.payload.message_ref().unwrap();
        assert_eq!(message.body, MessageBody::text("hello"));
        assert_ne!(message.id, original_id);
        assert_eq!(
            message.context.as_ref().and_then(|c| c.id.as_deref()),
            Some(original_id.as_str())
        );
    }

    #[tokio::test]
    async fn status_update_is_rewritten_to_internal_id() {
        let fx = Fixture::new();
        let sent = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "OUT1", "fromMe": true },
                "message": { "conversation": "pedido confirmado" }
            }))
            .await
            .unwrap();
        let internal = sent.envelope.payload.message_ref().unwrap().id.clone();
        assert_eq!(sent.envelope.payload.message_ref().unwrap().from, SESSION);

        let out = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "OUT1", "fromMe": true },
                "update": { "status": 3 }
            }))
            .await
            .unwrap();

        let status = out.envelope.payload.status_ref().unwrap();
        assert_eq!(status.id, internal);
        assert_eq!(status.recipient_id, "5511988887777");
        assert_eq!(status.status, DeliveryStatus::Delivered);
        assert_eq!(out.status_change.unwrap().message_id, internal);
    }

    #[tokio::test]
    async fn unknown_status_ids_pass_through() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "NEVER_SEEN", "fromMe": true },
                "update": { "status": "SERVER_ACK" }
            }))
            .await
            .unwrap();
        assert_eq!(out.envelope.payload.status_ref().unwrap().id, "NEVER_SEEN");
    }

    #[tokio::test]
    async fn decrypt_stubs_depend_on_direction() {
        let fx = Fixture::new();
        let inbound = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "C1" },
                "messageStubType": 2
            }))
            .await;
        assert!(inbound.is_none());

        let outbound = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "C2", "fromMe": true },
                "messageStubType": 2
            }))
            .await
            .unwrap();
        assert_eq!(
            outbound.envelope.payload.message_ref().unwrap().body,
            MessageBody::text(fx.tenant.decrypt_failure_text.clone())
        );
    }

    #[tokio::test]
    async fn unknown_content_downgrades_to_failed_status() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "U1" },
                "message": { "pollCreationMessageV3": { "name": "lunch?" } }
            }))
            .await
            .unwrap();

        let status = out.envelope.payload.status_ref().unwrap();
        assert_eq!(status.status, DeliveryStatus::Failed);
        assert_eq!(status.errors[0].code, 1);
        assert!(status.errors[0].title.contains("pollCreationMessageV3"));
        assert_eq!(
            out.status_change.map(|c| c.status),
            Some(DeliveryStatus::Failed)
        );
    }

    #[tokio::test]
    async fn reactions_and_quotes_point_at_internal_ids() {
        let fx = Fixture::new();
        let original = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "M1", "fromMe": true },
                "message": { "conversation": "menu" }
            }))
            .await
            .unwrap();
        let internal = original.envelope.payload.message_ref().unwrap().id.clone();

        let reaction = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "R1" },
                "message": { "reactionMessage": { "key": { "id": "M1" }, "text": "❤" } }
            }))
            .await
            .unwrap();
        let MessageBody::Reaction { reaction } = &reaction.envelope.payload.message_ref().unwrap().body
        else {
            panic!("expected reaction");
        };
        assert_eq!(reaction.message_id, internal);

        let quote = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "Q1" },
                "message": { "extendedTextMessage": {
                    "text": "this one",
                    "contextInfo": { "stanzaId": "M1", "participant": "5511900000000@s.whatsapp.net" }
                } }
            }))
            .await
            .unwrap();
        let context = quote
            .envelope
            .payload
            .message_ref()
            .unwrap()
            .context
            .clone()
            .unwrap();
        assert_eq!(context.id.as_deref(), Some(internal.as_str()));
        assert_eq!(context.from.as_deref(), Some(SESSION));
    }

    #[tokio::test]
    async fn group_messages_carry_group_contact() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": {
                    "remoteJid": "120363040000000000@g.us",
                    "participant": "5511988887777@s.whatsapp.net",
                    "id": "G1"
                },
                "message": { "conversation": "bom dia" },
                "pushName": "Ana",
                "groupMetadata": { "id": "120363040000000000@g.us", "subject": "Equipe" }
            }))
            .await
            .unwrap();

        let message = out.envelope.payload.message_ref().unwrap();
        assert_eq!(message.from, "5511988887777");
        let contact = &out.envelope.payload.change_value().unwrap().contacts[0];
        assert_eq!(contact.group_id.as_deref(), Some("120363040000000000@g.us"));
        assert_eq!(contact.group_subject.as_deref(), Some("Equipe"));
        assert_eq!(out.envelope.meta.conversation, "120363040000000000@g.us");
    }

    #[tokio::test]
    async fn mentions_use_push_names_learned_earlier() {
        let fx = Fixture::new();
        fx.run(json!({
            "key": { "remoteJid": "5511977776666@s.whatsapp.net", "id": "N1" },
            "message": { "conversation": "oi" },
            "pushName": "Bia"
        }))
        .await
        .unwrap();

        let out = fx
            .run(json!({
                "key": { "remoteJid": "5511988887777@s.whatsapp.net", "id": "N2" },
                "message": { "extendedTextMessage": {
                    "text": "fala com @5511977776666",
                    "contextInfo": { "mentionedJid": ["5511977776666@s.whatsapp.net"] }
                } }
            }))
            .await
            .unwrap();
        assert_eq!(
            out.envelope.payload.message_ref().unwrap().body,
            MessageBody::text("fala com @Bia")
        );
    }

    #[tokio::test]
    async fn contact_update_is_contacts_only() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "", "id": "" },
                "contact": {
                    "id": "236395184570386@lid",
                    "phoneNumber": "5511977776666@s.whatsapp.net",
                    "notify": "Carla"
                }
            }))
            .await
            .unwrap();

        let value = out.envelope.payload.change_value().unwrap();
        assert!(value.messages.is_empty() && value.statuses.is_empty());
        assert_eq!(value.contacts[0].wa_id, "5511977776666");
        assert_eq!(value.contacts[0].profile.name, "Carla");
        assert_eq!(out.envelope.meta.kind, PayloadKind::Contacts);
    }

    #[tokio::test]
    async fn broadcast_statuses_are_ignored_by_default() {
        let fx = Fixture::new();
        let out = fx
            .run(json!({
                "key": { "remoteJid": "status@broadcast", "participant": "5511988887777@s.whatsapp.net", "id": "S1" },
                "message": { "conversation": "story" }
            }))
            .await;
        assert!(out.is_none());
    }
}
