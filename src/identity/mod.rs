//! 身份模块
//!
//! 参与者在任一时刻只属于两个身份空间之一：
//! - 手机号身份（PN）：稳定、面向用户，规范形式为纯数字
//! - 关联设备身份（LID）：不透明、匿名化的传输层内部地址
//!
//! 本模块负责识别 JID 所属空间、把原始 JID 规范化为手机号形式（传输层自身的纯函数规则），
//! 并提供按会话分区的双向身份缓存。

mod cache;
mod numbering;

pub use cache::{IdentityCache, KeyVersion};
pub use numbering::{BrNinthDigit, NumberingPolicy, policies_from_names};

use std::sync::Arc;

pub const PHONE_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_PHONE_SERVER: &str = "c.us";
pub const LID_SERVER: &str = "lid";
pub const GROUP_SERVER: &str = "g.us";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// JID 所属的地址空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JidKind {
    Phone,
    LinkedDevice,
    Group,
    Newsletter,
    Broadcast,
    Unknown,
}

/// 拆分 JID 为 (user, server)，并去掉设备/代理后缀（`:12`、`.0:3`）
pub fn split_jid(raw: &str) -> (&str, Option<&str>) {
    let raw = raw.trim();
    let (user, server) = match raw.split_once('@') {
        Some((user, server)) => (user, Some(server)),
        None => (raw, None),
    };
    let user = user.split(':').next().unwrap_or(user);
    (user, server)
}

/// 识别 JID 所属空间
pub fn classify_jid(raw: &str) -> JidKind {
    let (user, server) = split_jid(raw);
    match server {
        Some(PHONE_SERVER) | Some(LEGACY_PHONE_SERVER) => JidKind::Phone,
        Some(LID_SERVER) => JidKind::LinkedDevice,
        Some(GROUP_SERVER) => JidKind::Group,
        Some(NEWSLETTER_SERVER) => JidKind::Newsletter,
        Some(BROADCAST_SERVER) => JidKind::Broadcast,
        Some(_) => JidKind::Unknown,
        None => {
            let digits = user.trim_start_matches('+');
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                JidKind::Phone
            } else {
                JidKind::Unknown
            }
        }
    }
}

pub fn is_phone_jid(raw: &str) -> bool {
    classify_jid(raw) == JidKind::Phone
}

pub fn is_lid_jid(raw: &str) -> bool {
    classify_jid(raw) == JidKind::LinkedDevice
}

/// 只保留用户部分中的数字
pub fn digits_of(raw: &str) -> String {
    let (user, _) = split_jid(raw);
    // 设备 ID 形如 `12345.0`，点号之后是代理编号
    let user = user.split('.').next().unwrap_or(user);
    user.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 规范化 LID：去掉设备后缀并补全服务器部分
pub fn canonical_lid(raw: &str) -> String {
    format!("{}@{}", digits_of(raw), LID_SERVER)
}

/// 传输层的身份规范化规则：纯函数，无 I/O
///
/// 取用户部分的数字，再依次应用号码规则插件（例如巴西手机号第九位）。
#[derive(Clone, Default)]
pub struct IdentityNormalizer {
    policies: Vec<Arc<dyn NumberingPolicy>>,
}

impl std::fmt::Debug for IdentityNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.policies.iter().map(|p| p.name()).collect();
        f.debug_struct("IdentityNormalizer")
            .field("policies", &names)
            .finish()
    }
}

impl IdentityNormalizer {
    pub fn new(policies: Vec<Arc<dyn NumberingPolicy>>) -> Self {
        Self { policies }
    }

    /// 按配置的名称构建
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(policies_from_names(names))
    }

    /// `resolveIdentity(rawId) -> canonicalForm`
    ///
    /// 群组、频道等非个人 JID 原样返回。
    pub fn resolve_identity(&self, raw: &str) -> String {
        match classify_jid(raw) {
            JidKind::Group | JidKind::Newsletter | JidKind::Broadcast => raw.trim().to_string(),
            JidKind::Phone | JidKind::LinkedDevice | JidKind::Unknown => {
                let digits = digits_of(raw);
                if digits.is_empty() {
                    return raw.trim().to_string();
                }
                self.policies
                    .iter()
                    .fold(digits, |number, policy| policy.apply(&number))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_identity_spaces() {
        assert_eq!(classify_jid("5511999998888@s.whatsapp.net"), JidKind::Phone);
        assert_eq!(classify_jid("5511999998888:12@s.whatsapp.net"), JidKind::Phone);
        assert_eq!(classify_jid("5511999998888"), JidKind::Phone);
        assert_eq!(classify_jid("+5511999998888"), JidKind::Phone);
        assert_eq!(classify_jid("236395184570386:75@lid"), JidKind::LinkedDevice);
        assert_eq!(classify_jid("120363040000000000@g.us"), JidKind::Group);
        assert_eq!(classify_jid("120363000000000@newsletter"), JidKind::Newsletter);
        assert_eq!(classify_jid(STATUS_BROADCAST), JidKind::Broadcast);
        assert_eq!(classify_jid("hello"), JidKind::Unknown);
    }

    #[test]
    fn digits_drop_device_and_agent_suffixes() {
        assert_eq!(digits_of("236395184570386.1:75@lid"), "236395184570386");
        assert_eq!(digits_of("5511999998888:3@s.whatsapp.net"), "5511999998888");
        assert_eq!(canonical_lid("236395184570386:75@lid"), "236395184570386@lid");
    }

    #[test]
    fn resolve_identity_applies_policies() {
        let normalizer = IdentityNormalizer::from_names(&["br_ninth_digit"]);
        assert_eq!(
            normalizer.resolve_identity("551188887777@s.whatsapp.net"),
            "5511988887777"
        );
        assert_eq!(
            normalizer.resolve_identity("120363040000000000@g.us"),
            "120363040000000000@g.us"
        );
        let plain = IdentityNormalizer::default();
        assert_eq!(
            plain.resolve_identity("551188887777@s.whatsapp.net"),
            "551188887777"
        );
    }
}
