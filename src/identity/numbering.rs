//! 号码规则插件
//!
//! 各地区的号码规划细节不属于核心逻辑，以插件形式按名称启用。

use std::sync::Arc;

/// 地区号码规则
pub trait NumberingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 输入为纯数字号码，返回规范化后的纯数字号码
    fn apply(&self, digits: &str) -> String;
}

/// 巴西手机号第九位
///
/// 12 位（55 + 两位区号 + 8 位用户号）且用户号以 6-9 开头时，补上第九位 `9`。
#[derive(Debug, Clone, Copy, Default)]
pub struct BrNinthDigit;

impl NumberingPolicy for BrNinthDigit {
    fn name(&self) -> &'static str {
        "br_ninth_digit"
    }

    fn apply(&self, digits: &str) -> String {
        if digits.len() != 12 || !digits.starts_with("55") {
            return digits.to_string();
        }
        let (country_area, subscriber) = digits.split_at(4);
        match subscriber.as_bytes().first() {
            Some(b'6'..=b'9') => format!("{country_area}9{subscriber}"),
            _ => digits.to_string(),
        }
    }
}

/// 根据配置中的名称构建规则列表，未知名称记录告警后忽略
pub fn policies_from_names<S: AsRef<str>>(names: &[S]) -> Vec<Arc<dyn NumberingPolicy>> {
    names
        .iter()
        .filter_map(|name| match name.as_ref() {
            "br_ninth_digit" => Some(Arc::new(BrNinthDigit) as Arc<dyn NumberingPolicy>),
            other => {
                tracing::warn!(policy = %other, "unknown numbering policy, ignored");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_ninth_digit_for_brazilian_mobiles() {
        let policy = BrNinthDigit;
        assert_eq!(policy.apply("551188887777"), "5511988887777");
        assert_eq!(policy.apply("554199998888"), "5541999998888");
    }

    #[test]
    fn leaves_landlines_and_other_countries_alone() {
        let policy = BrNinthDigit;
        // 固话以 2-5 开头
        assert_eq!(policy.apply("551133334444"), "551133334444");
        assert_eq!(policy.apply("5511988887777"), "5511988887777");
        assert_eq!(policy.apply("491511234567"), "491511234567");
    }

    #[test]
    fn unknown_policy_names_are_skipped() {
        let policies = policies_from_names(&["br_ninth_digit", "mars_dialing_plan"]);
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name(), "br_ninth_digit");
    }
}
