//! 推送名簿与 @提及替换

use std::collections::HashMap;

use dashmap::DashMap;

use crate::identity::{IdentityCache, JidKind, classify_jid, digits_of};

/// 会话内见过的推送名（按号码数字或设备数字索引）
#[derive(Debug, Default)]
pub struct NameBook {
    names: DashMap<String, String>,
}

impl NameBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录名字；同一个人的多个身份形式都指向该名字
    pub fn remember<S: AsRef<str>>(&self, ids: &[S], name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        for id in ids {
            let digits = digits_of(id.as_ref());
            if !digits.is_empty() {
                self.names.insert(digits, name.to_string());
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<String> {
        let digits = digits_of(id);
        self.names.get(&digits).map(|name| name.value().clone())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 把文本中的 `@数字` 替换为可读形式
///
/// 优先级：已知名字 > 解析出的手机号 > 原始设备数字。只替换完整的数字串，
/// `@123` 不会匹配 `@12345`。
pub async fn replace_mentions(
    text: &str,
    mentioned: &[String],
    session: &str,
    names: &NameBook,
    identity: &IdentityCache,
) -> String {
    if mentioned.is_empty() || !text.contains('@') {
        return text.to_string();
    }

    let targets: HashMap<String, &str> = mentioned
        .iter()
        .map(|jid| (digits_of(jid), jid.as_str()))
        .filter(|(digits, _)| !digits.is_empty())
        .collect();

    let mut displays: HashMap<&str, String> = HashMap::new();
    for digits in mention_tokens(text) {
        let Some(jid) = targets.get(digits).copied() else {
            continue;
        };
        if displays.contains_key(digits) {
            continue;
        }
        let display = match names.lookup(jid) {
            Some(name) => name,
            None => match classify_jid(jid) {
                JidKind::LinkedDevice => identity
                    .resolve_phone_for_device(session, jid)
                    .await
                    .unwrap_or_else(|| digits.to_string()),
                _ => identity.normalizer().resolve_identity(jid),
            },
        };
        displays.insert(digits, display);
    }
    if displays.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        out.push('@');
        let after = &rest[at + 1..];
        let digits = leading_digits(after);
        match displays.get(digits) {
            Some(display) => out.push_str(display),
            None => out.push_str(digits),
        }
        rest = &after[digits.len()..];
    }
    out.push_str(rest);
    out
}

/// 文本中每个 `@` 之后的完整数字串
fn mention_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split('@')
        .skip(1)
        .map(leading_digits)
        .filter(|digits| !digits.is_empty())
}

fn leading_digits(text: &str) -> &str {
    let len = text.bytes().take_while(u8::is_ascii_digit).count();
    &text[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityNormalizer;
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn identity() -> IdentityCache {
        IdentityCache::new(
            Arc::new(MemoryStore::new()),
            "bridge",
            Duration::from_secs(60),
            IdentityNormalizer::default(),
        )
    }

    #[tokio::test]
    async fn mentions_follow_priority_order() {
        let identity = identity();
        identity
            .record("s", "5511988887777@s.whatsapp.net", "111222333@lid")
            .await;
        let names = NameBook::new();
        names.remember(&["5511977776666@s.whatsapp.net"], "Bia");

        let text = "@5511977776666 @111222333 @444555666 oi";
        let mentioned = vec![
            "5511977776666@s.whatsapp.net".to_string(),
            "111222333@lid".to_string(),
            "444555666@lid".to_string(),
        ];
        let out = replace_mentions(text, &mentioned, "s", &names, &identity).await;
        assert_eq!(out, "@Bia @5511988887777 @444555666 oi");
    }

    #[tokio::test]
    async fn longer_tokens_are_replaced_first() {
        let names = NameBook::new();
        names.remember(&["123@lid"], "Short");
        names.remember(&["1234@lid"], "Long");
        let out = replace_mentions(
            "@1234 @123",
            &["123@lid".to_string(), "1234@lid".to_string()],
            "s",
            &names,
            &identity(),
        )
        .await;
        assert_eq!(out, "@Long @Short");
    }

    #[tokio::test]
    async fn mention_never_rewrites_a_longer_digit_run() {
        let names = NameBook::new();
        names.remember(&["123@lid"], "Short");
        let out = replace_mentions(
            "@12345 @123, @123x e@123",
            &["123@lid".to_string()],
            "s",
            &names,
            &identity(),
        )
        .await;
        assert_eq!(out, "@12345 @Short, @Shortx e@Short");
    }

    #[tokio::test]
    async fn replaced_phone_numbers_are_not_matched_again() {
        let identity = identity();
        identity
            .record("s", "5511988887777@s.whatsapp.net", "111222333@lid")
            .await;
        let names = NameBook::new();
        names.remember(&["5511@lid"], "Prefix");
        let out = replace_mentions(
            "@111222333 @5511",
            &["111222333@lid".to_string(), "5511@lid".to_string()],
            "s",
            &names,
            &identity,
        )
        .await;
        assert_eq!(out, "@5511988887777 @Prefix");
    }
}
