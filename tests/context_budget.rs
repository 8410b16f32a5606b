//! Long conversations squeezed into small model windows

use conversation_core::config::ContextConfig;
use conversation_core::context::{
    ChatMessage, ContextWindowManager, HeuristicEstimator, Message, Role, TruncationStrategy,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

fn manager(model_limits: HashMap<String, usize>) -> ContextWindowManager {
    let config = ContextConfig {
        response_reserve: 100,
        default_max_tokens: 1000,
        default_system_prompt: "Answer briefly.".to_string(),
        model_limits,
        ..Default::default()
    };
    ContextWindowManager::new(&config, Arc::new(HeuristicEstimator::default()))
}

fn history(conversation_id: Uuid, turns: usize) -> Vec<Message> {
    (0..turns)
        .map(|i| {
            let chat = if i % 2 == 0 {
                ChatMessage::user(format!("Question {} {}", i, "about lifetimes ".repeat(10)))
            } else {
                ChatMessage::assistant(format!("Answer {} {}", i, "borrowck says ".repeat(12)))
            };
            Message::new(conversation_id, chat, 0)
        })
        .collect()
}

#[test]
fn test_prepared_context_respects_budget() {
    let manager = manager(HashMap::from([("tiny-model".to_string(), 600)]));
    let budget = manager.budget("tiny-model");
    assert_eq!(budget.available_tokens, 500);

    let conversation_id = Uuid::new_v4();
    let history = history(conversation_id, 60);
    let prepared = manager.prepare_for_model(&history, &budget, true, None);

    assert!(prepared.truncated);
    assert!(prepared.tokens_removed > 0);
    assert!(prepared.stats.fits);
    assert!(prepared.stats.total_tokens <= budget.available_tokens);
    assert_eq!(prepared.messages[0].role, Role::System);
    assert_eq!(prepared.messages[0].content, "Answer briefly.");

    // The opening question is protected, the newest message survives
    assert!(prepared.messages[1].content.starts_with("Question 0 "));
    assert_eq!(
        prepared.messages.last().map(|m| m.content.clone()),
        history.last().map(|m| m.content.clone())
    );
}

#[test]
fn test_max_history_caps_before_truncation() {
    let manager = manager(HashMap::new());
    let budget = manager.budget("unknown-model");
    assert_eq!(budget.max_tokens, 1000);

    let history = history(Uuid::new_v4(), 10);
    let prepared = manager.prepare_for_model(&history, &budget, false, Some(4));
    assert!(!prepared.truncated);
    assert_eq!(prepared.messages.len(), 4);
    assert!(prepared.messages[0].content.starts_with("Question 6 "));
}

#[test]
fn test_every_strategy_stays_within_budget() {
    let manager = manager(HashMap::from([("tiny-model".to_string(), 400)]));
    let budget = manager.budget("tiny-model");

    let mut messages = vec![ChatMessage::system("Stay on topic.")];
    messages.extend(history(Uuid::new_v4(), 30).iter().map(Message::to_chat));
    messages.insert(5, ChatMessage::tool("{\"rows\": 3}", "exec-7"));

    for strategy in [
        TruncationStrategy::Sliding,
        TruncationStrategy::Smart,
        TruncationStrategy::Summary,
    ] {
        let result = manager.truncate(&messages, &budget, strategy);
        assert!(manager.count_tokens(&result.messages) <= budget.available_tokens);
        assert!(result
            .messages
            .iter()
            .any(|m| m.role == Role::System && m.content == "Stay on topic."));
        assert_eq!(
            result.tokens_removed,
            manager.count_tokens(&messages) - manager.count_tokens(&result.messages)
        );
    }

    let smart = manager.truncate(&messages, &budget, TruncationStrategy::Smart);
    assert!(smart.messages.iter().any(|m| m.tool_reference.as_deref() == Some("exec-7")));
}
