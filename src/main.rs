//! Tiny chatbot demo
//!
//! Runs a two-node flow for a single session on the console channel:
//! `start` greets the user and remembers a name, `date` tells the date.
//! Set `CHATFLOW_ENV_FILE` to hand a `.env` file to the flow.

use chatflow::channels::CONSOLE;
use chatflow::config::read_environment_file;
use chatflow::{
    ChatbotConfiguration, ChatbotFlow, FlowError, FlowRunner, GraphBuilder, Message, NodeContext,
    NodeFn, SessionConfig, StateHandle, END,
};
use std::collections::HashMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct TinyChatbot;

async fn start(state: StateHandle, ctx: NodeContext) -> Result<(), FlowError> {
    let greeting = match ctx.get_environment_variable("GREETING") {
        Some(greeting) => greeting.to_string(),
        None => "Hello back at you".to_string(),
    };
    ctx.send_text_response(&greeting).await?;
    state.save_variable("name", "foo");
    Ok(())
}

async fn date(ctx: NodeContext) -> Result<(), FlowError> {
    let today = chrono::Local::now().format("%A, %d %B %Y");
    ctx.send_text_response(&format!("Today is {today}")).await
}

impl ChatbotFlow for TinyChatbot {
    fn declare_nodes(&self, graph: &mut GraphBuilder) {
        graph
            .add_node("start", NodeFn::with_state_and_context(start))
            .add_node("date", NodeFn::with_context(date))
            .create_entry_point("start");
    }

    fn declare_transitions(&self, graph: &mut GraphBuilder) {
        graph.add_edge("start", "date").add_edge("date", END);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let environment = match std::env::var("CHATFLOW_ENV_FILE") {
        Ok(path) => read_environment_file(path)?,
        Err(_) => HashMap::new(),
    };

    let runner = FlowRunner::builder(TinyChatbot)
        .with_configuration(ChatbotConfiguration::from_env()?)
        .with_environment(environment)
        .build()?;

    let config = SessionConfig::new("123").with_channel(CONSOLE);
    for text in ["Hello from John Doe", "Bye!"] {
        let report = runner.run(Message::user_text(text), &config).await?;
        tracing::info!(outcome = ?report.outcome, "Message processed");
    }

    if let Some(state) = runner.get_state(&config).await? {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    Ok(())
}
