//! 订阅表达式

use std::fmt;

/// 匹配全部 tag 的表达式
pub const SUBSCRIBE_ALL: &str = "*";

/// tag 订阅表达式：`tagA || tagB`，`*` 或空表示全部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionExpression {
    tags: Vec<String>,
}

impl SubscriptionExpression {
    pub fn all() -> Self {
        Self { tags: Vec::new() }
    }

    /// 由 tag 列表构造，任一元素为 `*` 时匹配全部
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag == SUBSCRIBE_ALL {
                return Self::all();
            }
            if !tag.is_empty() && !parsed.iter().any(|t: &String| t == tag) {
                parsed.push(tag.to_string());
            }
        }
        Self { tags: parsed }
    }

    /// 解析 `a || b` 形式的表达式
    pub fn parse(expression: &str) -> Self {
        Self::from_tags(expression.split("||"))
    }

    pub fn is_all(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.is_all() || self.tags.iter().any(|t| t == tag)
    }
}

impl fmt::Display for SubscriptionExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "{}", SUBSCRIBE_ALL)
        } else {
            write!(f, "{}", self.tags.join("||"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_tags_with_double_pipe() {
        let expr = SubscriptionExpression::from_tags(["created", "paid"]);
        assert_eq!(expr.to_string(), "created||paid");
        assert!(expr.matches("paid"));
        assert!(!expr.matches("refunded"));
    }

    #[test]
    fn star_or_empty_matches_everything() {
        assert!(SubscriptionExpression::from_tags(["*"]).is_all());
        assert!(SubscriptionExpression::from_tags(Vec::<String>::new()).is_all());
        assert!(SubscriptionExpression::parse(" a || * ").matches("anything"));
    }

    #[test]
    fn parse_round_trips_display() {
        let expr = SubscriptionExpression::parse("a || b||a");
        assert_eq!(expr.tags(), ["a".to_string(), "b".to_string()]);
        assert_eq!(SubscriptionExpression::parse(&expr.to_string()), expr);
    }
}
