//! 身份映射缓存（PN ↔ LID）
//!
//! 尽力而为的缓存，不是事实来源：
//! - 写入前校验角色（一侧必须是手机号，另一侧必须是 LID），角色颠倒时交换一次，否则丢弃
//! - 同时写入新旧两代键格式，读取时新格式优先，无需迁移即可兼容任一代缓存
//! - 存储不可用时按完全未命中处理，从不返回错误
//! - 手机号一律经号码规则规范化后写入和返回，与事件上显式手机号的展示形式一致

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{BridgeError, Component, ErrorPolicy, policy_for};
use crate::metrics::METRICS;
use crate::store::KvStore;

use super::{
    IdentityNormalizer, LID_SERVER, PHONE_SERVER, canonical_lid, classify_jid, digits_of,
    JidKind,
};

/// 身份键格式版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVersion {
    /// `{p}:identity:{session}:{jid}` → 对端 JID
    Legacy,
    /// `{p}:identity:v2:{session}:{pn|lid}:{digits}` → 对端规范值
    Current,
}

impl KeyVersion {
    fn phone_lookup_key(&self, prefix: &str, session: &str, lid_digits: &str) -> String {
        match self {
            KeyVersion::Legacy => {
                format!("{prefix}:identity:{session}:{lid_digits}@{LID_SERVER}")
            }
            KeyVersion::Current => format!("{prefix}:identity:v2:{session}:lid:{lid_digits}"),
        }
    }

    fn device_lookup_key(&self, prefix: &str, session: &str, phone_digits: &str) -> String {
        match self {
            KeyVersion::Legacy => {
                format!("{prefix}:identity:{session}:{phone_digits}@{PHONE_SERVER}")
            }
            KeyVersion::Current => format!("{prefix}:identity:v2:{session}:pn:{phone_digits}"),
        }
    }

    fn encode_phone(&self, phone_digits: &str) -> String {
        match self {
            KeyVersion::Legacy => format!("{phone_digits}@{PHONE_SERVER}"),
            KeyVersion::Current => phone_digits.to_string(),
        }
    }

    fn encode_device(&self, lid_digits: &str) -> String {
        format!("{lid_digits}@{LID_SERVER}")
    }
}

/// 版本化键策略：写入所有版本，按顺序读取第一个命中
#[derive(Debug, Clone)]
struct VersionedKeys {
    prefix: String,
    versions: Vec<KeyVersion>,
}

impl VersionedKeys {
    fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            versions: vec![KeyVersion::Current, KeyVersion::Legacy],
        }
    }
}

/// 身份映射缓存
#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn KvStore>,
    keys: VersionedKeys,
    ttl: Duration,
    normalizer: IdentityNormalizer,
}

impl IdentityCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: impl Into<String>,
        ttl: Duration,
        normalizer: IdentityNormalizer,
    ) -> Self {
        Self {
            store,
            keys: VersionedKeys::new(prefix),
            ttl,
            normalizer,
        }
    }

    pub fn normalizer(&self) -> &IdentityNormalizer {
        &self.normalizer
    }

    /// `resolvePhoneForDevice(session, deviceId) -> phoneId | absent`
    pub async fn resolve_phone_for_device(&self, session: &str, device: &str) -> Option<String> {
        if classify_jid(device) != JidKind::LinkedDevice {
            return None;
        }
        let lid = digits_of(device);
        for version in &self.keys.versions {
            let key = version.phone_lookup_key(&self.keys.prefix, session, &lid);
            if let Some(value) = self.read(&key).await {
                if !digits_of(&value).is_empty() {
                    METRICS.identity_lookup("hit");
                    return Some(self.normalizer.resolve_identity(&value));
                }
            }
        }
        METRICS.identity_lookup("miss");
        None
    }

    /// `resolveDeviceForPhone(session, phoneId) -> deviceId | absent`
    pub async fn resolve_device_for_phone(&self, session: &str, phone: &str) -> Option<String> {
        if classify_jid(phone) != JidKind::Phone {
            return None;
        }
        // 旧缓存里可能存的是未规范化的号码，两种形式都查
        let normalized = self.normalizer.resolve_identity(phone);
        let raw = digits_of(phone);
        let mut forms = vec![normalized];
        if raw != forms[0] {
            forms.push(raw);
        }
        for version in &self.keys.versions {
            for form in &forms {
                let key = version.device_lookup_key(&self.keys.prefix, session, form);
                if let Some(value) = self.read(&key).await {
                    if classify_jid(&value) == JidKind::LinkedDevice {
                        METRICS.identity_lookup("hit");
                        return Some(canonical_lid(&value));
                    }
                }
            }
        }
        METRICS.identity_lookup("miss");
        None
    }

    /// `record(session, phoneId, deviceId)`
    ///
    /// 角色颠倒时交换一次；仍不合法则静默丢弃。重复写入同一对映射是幂等的。
    pub async fn record(&self, session: &str, phone: &str, device: &str) {
        let (phone, device) = match (classify_jid(phone), classify_jid(device)) {
            (JidKind::Phone, JidKind::LinkedDevice) => (phone, device),
            (JidKind::LinkedDevice, JidKind::Phone) => {
                debug!(session = %session, phone = %device, device = %phone, "identity pair swapped");
                (device, phone)
            }
            _ => {
                debug!(session = %session, phone = %phone, device = %device, "invalid identity pair dropped");
                return;
            }
        };

        let phone_digits = self.normalizer.resolve_identity(phone);
        let lid_digits = digits_of(device);
        if phone_digits.is_empty() || lid_digits.is_empty() {
            return;
        }

        for version in &self.keys.versions {
            let prefix = &self.keys.prefix;
            let forward = version.phone_lookup_key(prefix, session, &lid_digits);
            let backward = version.device_lookup_key(prefix, session, &phone_digits);
            self.write(&forward, &version.encode_phone(&phone_digits)).await;
            self.write(&backward, &version.encode_device(&lid_digits)).await;
        }
    }

    /// 读取映射；未命中时按传输层规则推导手机号并顺带回写缓存
    ///
    /// 返回 (手机号, 是否由推导得到)。
    pub async fn phone_or_derive(&self, session: &str, device: &str) -> (String, bool) {
        if let Some(phone) = self.resolve_phone_for_device(session, device).await {
            return (phone, false);
        }
        let derived = self.normalizer.resolve_identity(device);
        METRICS.identity_lookup("derived");
        self.record(session, &derived, device).await;
        (derived, true)
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                self.degrade(&err, key);
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.store.set_ex(key, value, self.ttl).await {
            self.degrade(&err, key);
        }
    }

    fn degrade(&self, err: &BridgeError, key: &str) {
        debug_assert_eq!(
            policy_for(Component::IdentityCache, err.kind()),
            ErrorPolicy::Degrade
        );
        METRICS.identity_lookup("unavailable");
        warn!(error = %err, key = %key, "identity cache unavailable, treating as miss");
    }
}
