//! Update classification tests: the order of the rules is the contract.

use kobo_companion::telegram::gateway::BotIdentity;
use kobo_companion::telegram::router::{classify, strip_mention, Disposition};
use kobo_companion::types::{ConversationUpdate, PriorMessage};

const HOME_CHAT: i64 = -100_500;

fn bot() -> BotIdentity {
    BotIdentity {
        id: 999,
        username: "reader_bot".to_owned(),
    }
}

fn update(text: &str) -> ConversationUpdate {
    ConversationUpdate {
        message_id: 10,
        chat_id: HOME_CHAT,
        sender_id: 42,
        sender_is_bot: false,
        text: text.to_owned(),
        mentions: Vec::new(),
        reply_to: None,
    }
}

fn reply_to(sender_id: u64, sender_is_bot: bool) -> Option<PriorMessage> {
    Some(PriorMessage {
        message_id: 5,
        sender_id,
        sender_is_bot,
        text: "An earlier analysis.".to_owned(),
    })
}

#[test]
fn foreign_chat_is_ignored_even_with_mention() {
    let mut u = update("@reader_bot hello");
    u.chat_id = 123;
    u.mentions = vec!["reader_bot".to_owned()];
    assert!(matches!(
        classify(&u, HOME_CHAT, &bot()),
        Disposition::Ignore(_)
    ));
}

#[test]
fn bot_author_is_ignored_even_when_replying_to_self() {
    let mut u = update("I am a bot echoing myself");
    u.sender_is_bot = true;
    u.reply_to = reply_to(999, true);
    assert!(matches!(
        classify(&u, HOME_CHAT, &bot()),
        Disposition::Ignore(_)
    ));
}

#[test]
fn mention_starts_general_question() {
    let mut u = update("@reader_bot what is paging?");
    u.mentions = vec!["reader_bot".to_owned()];
    assert_eq!(classify(&u, HOME_CHAT, &bot()), Disposition::GeneralQuestion);
}

#[test]
fn mention_is_case_insensitive() {
    let mut u = update("@Reader_Bot what is paging?");
    u.mentions = vec!["Reader_Bot".to_owned()];
    assert_eq!(classify(&u, HOME_CHAT, &bot()), Disposition::GeneralQuestion);
}

#[test]
fn mention_wins_over_reply() {
    let mut u = update("@reader_bot more please");
    u.mentions = vec!["reader_bot".to_owned()];
    u.reply_to = reply_to(999, true);
    assert_eq!(classify(&u, HOME_CHAT, &bot()), Disposition::GeneralQuestion);
}

#[test]
fn reply_to_the_bot_is_a_follow_up() {
    let mut u = update("why does the leader step down?");
    u.reply_to = reply_to(999, true);
    assert_eq!(classify(&u, HOME_CHAT, &bot()), Disposition::FollowUp);
}

#[test]
fn reply_to_another_user_is_ignored() {
    let mut u = update("I agree with you");
    u.reply_to = reply_to(1234, false);
    assert!(matches!(
        classify(&u, HOME_CHAT, &bot()),
        Disposition::Ignore(_)
    ));
}

#[test]
fn plain_chat_message_is_ignored() {
    let u = update("just chatting with a friend");
    assert!(matches!(
        classify(&u, HOME_CHAT, &bot()),
        Disposition::Ignore(_)
    ));
}

#[test]
fn mention_of_another_bot_is_ignored() {
    let mut u = update("@other_bot what do you think?");
    u.mentions = vec!["other_bot".to_owned()];
    assert!(matches!(
        classify(&u, HOME_CHAT, &bot()),
        Disposition::Ignore(_)
    ));
}

#[test]
fn strip_mention_removes_only_the_bots_token() {
    assert_eq!(
        strip_mention("@reader_bot what is paging?", "reader_bot"),
        "what is paging?"
    );
    assert_eq!(
        strip_mention("hey @Reader_Bot, explain @other_bot to me", "reader_bot"),
        "hey explain @other_bot to me"
    );
}

#[test]
fn strip_mention_of_everything_leaves_empty() {
    assert_eq!(strip_mention("@reader_bot", "reader_bot"), "");
}
