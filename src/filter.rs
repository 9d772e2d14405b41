//! Rule matching.
//!
//! Evaluates one message against one rule's chat scope, user scope and keyword set.
//! All three predicates must hold.

use crate::models::{ChatId, ChatMessage};
use crate::rules::{KeywordSet, Rule};

/// Check whether `rule` applies to `message` posted in `chat_id`.
///
/// ```
/// use chrono::Utc;
/// use ruckus::filter::matches;
/// use ruckus::models::ChatMessage;
/// use ruckus::rules::{PunishmentKind, Rule};
///
/// let rule = Rule::keyword("no-ban-talk", &["ban"], PunishmentKind::None);
/// let hit = ChatMessage::text(1, 5, 9, "bob", "I will ban you", Utc::now());
/// let miss = ChatMessage::text(2, 5, 9, "bob", "banana bread", Utc::now());
/// assert!(matches(&hit, &rule, 5));
/// assert!(!matches(&miss, &rule, 5));
/// ```
pub fn matches(message: &ChatMessage, rule: &Rule, chat_id: ChatId) -> bool {
    if !rule.chat.admits(chat_id) {
        return false;
    }

    let Some(author_id) = message.author_id() else {
        return false;
    };
    if !rule.user.admits(author_id) {
        return false;
    }

    keywords_match(&rule.keywords, message.body())
}

/// Whole-word or whole-phrase keyword check.
///
/// The text is lower-cased and padded with spaces, so `"ban"` matches `"ban me"`
/// but not `"banana"`.
pub fn keywords_match(keywords: &KeywordSet, text: &str) -> bool {
    let words = match keywords {
        KeywordSet::Anything => return true,
        KeywordSet::Words(words) => words,
    };

    if text.is_empty() {
        return false;
    }

    let padded = format!(" {} ", text.to_lowercase());
    words
        .iter()
        .any(|keyword| padded.contains(&format!(" {} ", keyword)))
}

/// Return the first rule in declared order that applies to the message.
pub fn first_match<'a>(message: &ChatMessage, rules: &'a [Rule], chat_id: ChatId) -> Option<&'a Rule> {
    rules.iter().find(|rule| matches(message, rule, chat_id))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::filter::{first_match, keywords_match, matches};
    use crate::models::ChatMessage;
    use crate::rules::{KeywordSet, PunishmentKind, Rule, Scope};

    fn msg(text: &str) -> ChatMessage {
        ChatMessage::text(1, 100, 7, "alice", text, Utc::now())
    }

    fn words(list: &[&str]) -> KeywordSet {
        KeywordSet::from(list.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn whole_word_only() {
        let kw = words(&["ban"]);
        assert!(keywords_match(&kw, "ban"));
        assert!(keywords_match(&kw, "please BAN him"));
        assert!(!keywords_match(&kw, "banana"));
        assert!(!keywords_match(&kw, "urban legend"));
    }

    #[test]
    fn phrases_match_as_a_unit() {
        let kw = words(&["free money"]);
        assert!(keywords_match(&kw, "get Free Money today"));
        assert!(!keywords_match(&kw, "free moneyball"));
        assert!(!keywords_match(&kw, "money free"));
    }

    #[test]
    fn empty_text_never_matches_keywords() {
        assert!(!keywords_match(&words(&["spam"]), ""));
    }

    #[test]
    fn anything_matches_empty_text() {
        assert!(keywords_match(&KeywordSet::Anything, ""));
    }

    #[test]
    fn caption_used_when_text_empty() {
        let mut message = msg("");
        message.caption = "buy spam here".to_string();
        let rule = Rule::keyword("r", &["spam"], PunishmentKind::None);
        assert!(matches(&message, &rule, 100));
    }

    #[test]
    fn chat_scope_is_enforced() {
        let rule = Rule::keyword("r", &["spam"], PunishmentKind::None).in_chat(200);
        assert!(!matches(&msg("spam"), &rule, 100));
        assert!(matches(&msg("spam"), &rule, 200));
    }

    #[test]
    fn user_scope_is_enforced() {
        let mut rule = Rule::keyword("r", &["*"], PunishmentKind::None);
        rule.user = Scope::Id(8);
        assert!(!matches(&msg("anything"), &rule, 100));
        rule.user = Scope::Id(7);
        assert!(matches(&msg("anything"), &rule, 100));
    }

    #[test]
    fn invalid_scope_never_matches() {
        let mut rule = Rule::keyword("r", &["*"], PunishmentKind::None);
        rule.chat = Scope::Invalid;
        assert!(!matches(&msg("spam"), &rule, 100));
    }

    #[test]
    fn anonymous_messages_never_match() {
        let mut message = msg("spam");
        message.author = None;
        let rule = Rule::keyword("r", &["*"], PunishmentKind::None);
        assert!(!matches(&message, &rule, 100));
    }

    #[test]
    fn first_declared_rule_wins() {
        let rules = vec![
            Rule::keyword("first", &["spam"], PunishmentKind::Mute),
            Rule::keyword("second", &["spam"], PunishmentKind::Ban),
        ];
        let found = first_match(&msg("spam"), &rules, 100).expect("should match");
        assert_eq!(found.name, "first");
    }
}
