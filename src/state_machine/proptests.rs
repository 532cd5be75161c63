//! Property-based tests for the conversation state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::{BUTTON_REPLY_TYPE, PAYLOAD, TYPE};
use super::*;
use crate::config::ChatbotConfiguration;
use crate::error::FlowError;
use crate::flow::{prepare_state, ChatbotFlow, FlowRunner, NodeContext, RunOutcome};
use crate::graph::{GraphBuilder, NodeFn, StateHandle};
use crate::session::SessionConfig;
use crate::testing::{context_factory, RecordingChannel};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Replays `messages` through [`prepare_state`] the way consecutive runs do
fn replay(messages: &[Message]) -> Option<ChatbotState> {
    messages.iter().fold(None, |previous, message| {
        Some(prepare_state(message.clone(), previous, None, Some("en")))
    })
}

/// Single node flow: echoes the user's text back and counts cycles
struct EchoFlow;

impl ChatbotFlow for EchoFlow {
    fn declare_nodes(&self, graph: &mut GraphBuilder) {
        graph
            .add_node(
                "echo",
                NodeFn::with_state_and_context(|state: StateHandle, ctx: NodeContext| async move {
                    let text = state
                        .get_user_message()
                        .and_then(|m| m.text().map(str::to_string))
                        .unwrap_or_default();
                    ctx.send_text_response(&format!("echo: {text}")).await?;
                    let seen = state
                        .get_variable("seen")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    state.save_variable("seen", seen + 1);
                    Ok::<_, FlowError>(())
                }),
            )
            .create_entry_point("echo");
    }
}

/// Flow that parks in `ask` until it receives "done"
struct WaitingFlow;

impl ChatbotFlow for WaitingFlow {
    fn declare_nodes(&self, graph: &mut GraphBuilder) {
        graph
            .add_node(
                "ask",
                NodeFn::with_context(|ctx: NodeContext| async move {
                    let answer = ctx.wait_user_input(Some("answer"))?;
                    Ok::<_, FlowError>(if answer.as_deref() == Some("done") {
                        Transition::end()
                    } else {
                        Transition::to("ask")
                    })
                }),
            )
            .create_entry_point("ask");
    }
}

fn runner<F: ChatbotFlow>(flow: F) -> FlowRunner<F> {
    FlowRunner::builder(flow)
        .with_channel(Arc::new(RecordingChannel::new()))
        .with_configuration(ChatbotConfiguration::new("en"))
        .build()
        .unwrap()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_text_message() -> impl Strategy<Value = Message> {
    "[a-zA-Z0-9 ]{1,30}".prop_map(Message::user_text)
}

fn arb_button_reply() -> impl Strategy<Value = Message> {
    "[A-Z_]{1,12}".prop_map(|payload| {
        Message::user(json!({ TYPE: BUTTON_REPLY_TYPE, PAYLOAD: payload }))
    })
}

fn arb_user_message() -> impl Strategy<Value = Message> {
    prop_oneof![3 => arb_text_message(), 1 => arb_button_reply()]
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z ]{0,16}".prop_map(Value::from),
    ]
}

#[derive(Debug, Clone)]
enum Mutation {
    SetVariable(String, Value),
    SetIntent(String),
    Reply(String),
}

fn arb_mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        ("[a-z]{1,6}", arb_value()).prop_map(|(name, value)| Mutation::SetVariable(name, value)),
        "[a-z]{1,10}".prop_map(Mutation::SetIntent),
        "[a-zA-Z ]{1,20}".prop_map(Mutation::Reply),
    ]
}

fn apply_to_handle(state: &StateHandle, mutations: &[Mutation]) {
    for mutation in mutations {
        match mutation.clone() {
            Mutation::SetVariable(name, value) => state.save_variable(name, value),
            Mutation::SetIntent(intent) => state.save_intent(intent),
            Mutation::Reply(text) => state.save_message(Message::assistant_text(text)),
        }
    }
}

fn apply_to_state(state: &mut ChatbotState, mutations: &[Mutation]) {
    for mutation in mutations {
        match mutation.clone() {
            Mutation::SetVariable(name, value) => state.set_variable(name, value),
            Mutation::SetIntent(intent) => state.set_intent(intent),
            Mutation::Reply(text) => state.push_message(Message::assistant_text(text)),
        }
    }
}

// ============================================================================
// Cycle accumulation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // Every message outside a suspension opens exactly one cycle
    #[test]
    fn prop_one_cycle_per_message(messages in proptest::collection::vec(arb_user_message(), 1..12)) {
        let state = replay(&messages).unwrap();

        prop_assert_eq!(state.conversation_cycles.len(), messages.len());
        for (cycle, message) in state.conversation_cycles.iter().zip(&messages) {
            prop_assert_eq!(&cycle.messages[0], message);
        }
        prop_assert_eq!(state.user_message(), messages.last());
    }

    // Variables survive any number of later cycles until overwritten
    #[test]
    fn prop_variables_persist_across_cycles(
        first in arb_user_message(),
        later in proptest::collection::vec(arb_user_message(), 0..10),
        name in "[a-z]{1,8}",
        value in arb_value(),
    ) {
        let mut state = prepare_state(first, None, None, Some("en"));
        state.set_variable(name.clone(), value.clone());

        for message in later {
            state = prepare_state(message, Some(state), None, None);
            prop_assert_eq!(state.variable(&name), Some(&value));
        }
    }

    // The intent a cycle ends with seeds the next cycle
    #[test]
    fn prop_intent_carries_into_next_cycle(
        first in arb_user_message(),
        second in arb_user_message(),
        intent in "[a-z]{1,10}",
    ) {
        let mut state = prepare_state(first, None, None, None);
        state.set_intent(intent.clone());
        let state = prepare_state(second, Some(state), None, None);
        prop_assert_eq!(state.intent(), Some(intent.as_str()));
        prop_assert_eq!(state.conversation_cycles[0].intent.as_deref(), Some(intent.as_str()));
    }

    // Language resolution never yields an empty language
    #[test]
    fn prop_language_always_resolved(
        message in arb_user_message(),
        language_override in proptest::option::of("[a-z]{2}"),
        default in proptest::option::of("[a-z]{2}"),
        previous_language in "[a-z]{0,2}",
    ) {
        let previous = ChatbotState::start(Message::user_text("before"), previous_language.clone());
        let state = prepare_state(
            message,
            Some(previous),
            language_override.as_deref(),
            default.as_deref(),
        );

        let expected = language_override
            .or(default)
            .or(Some(previous_language).filter(|l| !l.is_empty()))
            .unwrap_or_else(|| "en".to_string());
        prop_assert_eq!(state.user_language, expected);
    }
}

// ============================================================================
// State reducer
// ============================================================================

proptest! {
    #[test]
    fn prop_empty_update_keeps_state(message in arb_user_message(), name in "[a-z]{1,8}", value in arb_value()) {
        let mut current = ChatbotState::start(message, "en");
        current.set_variable(name, value);

        let reduced = reduce_state(current.clone(), ChatbotState::default());
        prop_assert_eq!(reduced, current);
    }

    #[test]
    fn prop_non_empty_update_replaces_state(
        before in arb_user_message(),
        after in arb_user_message(),
        language in "[a-z]{2}",
    ) {
        let current = ChatbotState::start(before, "en");
        let update = ChatbotState::start(after, language);

        let reduced = reduce_state(current, update.clone());
        prop_assert_eq!(reduced, update);
    }

    #[test]
    fn prop_state_survives_checkpoint_serialization(
        messages in proptest::collection::vec(arb_user_message(), 1..6),
        mutations in proptest::collection::vec(arb_mutation(), 0..10),
    ) {
        let mut state = replay(&messages).unwrap();
        apply_to_state(&mut state, &mutations);

        let encoded = serde_json::to_value(State::new(state.clone())).unwrap();
        let decoded: State = serde_json::from_value(encoded).unwrap();
        prop_assert_eq!(decoded.chatbot_state, state);
    }
}

// ============================================================================
// Node wrapper transparency
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    // Mutating in place and returning nothing equals returning the state
    #[test]
    fn prop_in_place_mutation_equals_explicit_return(
        message in arb_user_message(),
        mutations in proptest::collection::vec(arb_mutation(), 0..12),
    ) {
        let input = State::new(ChatbotState::start(message, "en"));

        let in_place = {
            let mutations = mutations.clone();
            NodeFn::with_state(move |state: StateHandle| {
                let mutations = mutations.clone();
                async move {
                    apply_to_handle(&state, &mutations);
                    Ok::<_, FlowError>(())
                }
            })
        };
        let explicit = {
            let mutations = mutations.clone();
            NodeFn::with_state(move |state: StateHandle| {
                let mutations = mutations.clone();
                async move {
                    let mut copy = state.snapshot();
                    apply_to_state(&mut copy, &mutations);
                    Ok::<_, FlowError>(copy)
                }
            })
        };

        let (a, b) = block_on(async {
            let a = in_place.call(input.clone(), context_factory("n")).await.unwrap();
            let b = explicit.call(input.clone(), context_factory("n")).await.unwrap();
            (a, b)
        });

        prop_assert_eq!(a, b);
    }

    // A transition carries the mutated state, not a delta
    #[test]
    fn prop_transition_carries_mutated_state(
        message in arb_user_message(),
        mutations in proptest::collection::vec(arb_mutation(), 0..12),
        target in "[a-z]{1,8}",
    ) {
        let input = State::new(ChatbotState::start(message, "en"));
        let mut expected = input.chatbot_state.clone();
        apply_to_state(&mut expected, &mutations);

        let node = {
            let mutations = mutations.clone();
            let target = target.clone();
            NodeFn::with_state(move |state: StateHandle| {
                let mutations = mutations.clone();
                let target = target.clone();
                async move {
                    apply_to_handle(&state, &mutations);
                    Ok::<_, FlowError>(Transition::to(target))
                }
            })
        };

        let command = block_on(node.call(input, context_factory("n"))).unwrap();
        prop_assert_eq!(command.goto, Some(target));
        prop_assert_eq!(command.update.chatbot_state, expected);
    }
}

// ============================================================================
// Runner-level properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_runs_accumulate_cycles(messages in proptest::collection::vec(arb_text_message(), 1..8)) {
        let runner = runner(EchoFlow);
        let config = SessionConfig::new("prop");

        let state = block_on(async {
            for message in &messages {
                runner.run(message.clone(), &config).await.unwrap();
            }
            runner.get_state(&config).await.unwrap().unwrap()
        });

        prop_assert_eq!(state.conversation_cycles.len(), messages.len());
        for (cycle, message) in state.conversation_cycles.iter().zip(&messages) {
            prop_assert_eq!(&cycle.messages[0], message);
            prop_assert_eq!(cycle.messages.len(), 2);
        }
        let seen = json!(messages.len());
        prop_assert_eq!(state.variable("seen"), Some(&seen));
    }

    #[test]
    fn prop_identical_resend_gives_identical_cycles(message in arb_text_message()) {
        let runner = runner(EchoFlow);
        let config = SessionConfig::new("prop");

        let state = block_on(async {
            runner.run(message.clone(), &config).await.unwrap();
            runner.run(message.clone(), &config).await.unwrap();
            runner.get_state(&config).await.unwrap().unwrap()
        });

        prop_assert_eq!(state.conversation_cycles.len(), 2);
        prop_assert_eq!(
            &state.conversation_cycles[0].messages,
            &state.conversation_cycles[1].messages
        );
    }

    // Messages sent while suspended are answers, never new cycles
    #[test]
    fn prop_suspended_session_never_opens_cycles(answers in proptest::collection::vec("[a-c]{1,3}", 0..8)) {
        let runner = runner(WaitingFlow);
        let config = SessionConfig::new("prop");

        let (outcomes, state) = block_on(async {
            let mut outcomes = vec![runner.run(Message::user_text("start"), &config).await.unwrap().outcome];
            for answer in &answers {
                outcomes.push(runner.run(Message::user_text(answer.as_str()), &config).await.unwrap().outcome);
            }
            (outcomes, runner.get_state(&config).await.unwrap().unwrap())
        });

        let suspended = RunOutcome::Suspended { node: "ask".into() };
        prop_assert!(outcomes.iter().all(|o| *o == suspended));
        prop_assert_eq!(state.conversation_cycles.len(), 1);
        prop_assert_eq!(state.conversation_cycles[0].messages.len(), answers.len() + 1);
        let last = answers.last().map(|a| Value::from(a.as_str()));
        prop_assert_eq!(state.variable("answer"), last.as_ref());
    }
}
