mod common;

use common::*;
use datachat::execution_loop::error_classifier::{ExecutionFailure, SqlErrorClass};
use datachat::execution_loop::observation::TimeoutStage;
use datachat::{AgentError, CompletionConfig, FailureCause, LoopOutcome, LoopState, SqlAgent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn agent(
    completion: &Arc<ScriptedCompletion>,
    executor: &Arc<ScriptedExecutor>,
    max_attempts: u32,
) -> SqlAgent {
    SqlAgent::new(
        completion.clone(),
        executor.clone(),
        Arc::new(sample_schema()),
        CompletionConfig::default(),
        fast_config(max_attempts),
    )
}

async fn ask(agent: &SqlAgent, question: &str) -> LoopOutcome {
    agent.run(question, &[], &CancellationToken::new()).await
}

#[tokio::test]
async fn test_repairs_failed_statement_and_answers() {
    let completion = Arc::new(ScriptedCompletion::texts(&[
        &sql_plan("SELECT sum(totl) FROM orders"),
        &sql_plan("SELECT sum(total) FROM orders"),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(ExecutionFailure::new(
            SqlErrorClass::UndefinedColumn,
            "column \"totl\" does not exist",
        )
        .with_fragment("totl")),
        Ok(result(&["sum"], vec![vec![json!(1250.5)]])),
    ]));

    let outcome = ask(&agent(&completion, &executor, 3), "What is the total of all orders?").await;

    let answer = outcome.answer().expect("answered");
    assert_eq!(answer.text, "1250.5");
    assert_eq!(answer.sql.as_deref(), Some("SELECT sum(total) FROM orders"));
    assert_eq!(outcome.attempts, 2);
    assert_eq!(completion.calls(), 2);
    assert_eq!(outcome.transcript.len(), 2);

    let prompts = completion.prompts();
    assert!(!prompts[0].contains("RETRY ATTEMPT"));
    assert!(prompts[1].contains("RETRY ATTEMPT 2"));
    assert!(prompts[1].contains("SELECT sum(totl) FROM orders"));
    assert!(prompts[1].contains("UndefinedColumn"));
}

#[tokio::test]
async fn test_budget_exhaustion_stops_provider_calls() {
    let failing = || {
        Err(ExecutionFailure::new(
            SqlErrorClass::UndefinedTable,
            "relation \"sales\" does not exist",
        ))
    };
    let completion = Arc::new(ScriptedCompletion::texts(&[
        &sql_plan("SELECT * FROM sales"),
        &sql_plan("SELECT * FROM sales"),
        &sql_plan("SELECT * FROM sales"),
        &sql_plan("SELECT * FROM sales"),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![failing(), failing(), failing(), failing()]));

    let outcome = ask(&agent(&completion, &executor, 3), "sales by month").await;

    assert_eq!(completion.calls(), 3);
    assert_eq!(executor.executed().len(), 3);
    assert!(outcome.budget_exhausted);
    assert!(matches!(
        outcome.failure(),
        Some(FailureCause::DatabaseError { .. })
    ));
    assert!(matches!(
        outcome.error(),
        Some(AgentError::RetryBudgetExhausted { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn test_provider_unavailable_fails_fast() {
    let completion = Arc::new(ScriptedCompletion::new(vec![
        Err(AgentError::ProviderUnavailable("HTTP 503".to_string())),
        Ok(sql_plan("SELECT 1")),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));

    let outcome = ask(&agent(&completion, &executor, 3), "how many orders?").await;

    assert_eq!(completion.calls(), 1);
    assert!(executor.executed().is_empty());
    assert!(!outcome.budget_exhausted);
    let cause = outcome.failure().expect("failed");
    assert!(matches!(cause, FailureCause::ProviderUnavailable { .. }));
    assert!(outcome.message().contains("unavailable"));
}

#[tokio::test]
async fn test_unparseable_plan_is_fed_back() {
    let completion = Arc::new(ScriptedCompletion::texts(&[
        "I think you should look at the orders table.",
        &answer_plan("There is one table: orders."),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));

    let outcome = ask(&agent(&completion, &executor, 3), "which tables exist?").await;

    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("There is one table: orders."));
    assert_eq!(outcome.attempts, 2);
    assert!(completion.prompts()[1].contains("could not be parsed"));
}

#[tokio::test]
async fn test_malformed_plans_until_exhaustion_ask_to_rephrase() {
    let completion = Arc::new(ScriptedCompletion::texts(&["hmm", "not sure", "???"]));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));

    let outcome = ask(&agent(&completion, &executor, 3), "blorp?").await;

    assert!(matches!(outcome.failure(), Some(FailureCause::MalformedPlan { .. })));
    assert!(outcome.message().contains("rephrase"));
}

#[tokio::test]
async fn test_write_statements_never_reach_the_database() {
    let completion = Arc::new(ScriptedCompletion::texts(&[
        &sql_plan("DELETE FROM orders"),
        &sql_plan("SELECT count(*) FROM orders"),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(result(&["count"], vec![vec![json!(7)]]))]));

    let outcome = ask(&agent(&completion, &executor, 3), "how many orders?").await;

    assert_eq!(executor.executed(), vec!["SELECT count(*) FROM orders".to_string()]);
    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("7"));
    assert!(completion.prompts()[1].contains("ReadOnlyViolation"));
}

#[tokio::test]
async fn test_connection_failure_is_fatal() {
    let completion = Arc::new(ScriptedCompletion::texts(&[&sql_plan("SELECT 1"), &sql_plan("SELECT 1")]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Err(ExecutionFailure::new(
        SqlErrorClass::ConnectionFailure,
        "connection refused",
    ))]));

    let outcome = ask(&agent(&completion, &executor, 3), "anything").await;

    assert_eq!(completion.calls(), 1);
    assert!(matches!(outcome.failure(), Some(FailureCause::DatabaseUnavailable { .. })));
    assert!(outcome.message().contains("database is unavailable"));
}

#[tokio::test]
async fn test_statement_timeout_becomes_timeout_observation() {
    let completion = Arc::new(ScriptedCompletion::texts(&[
        &sql_plan("SELECT * FROM orders o1, orders o2"),
        &sql_plan("SELECT count(*) FROM orders"),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(ExecutionFailure::new(
            SqlErrorClass::QueryCanceled,
            "canceling statement due to statement timeout",
        )),
        Ok(result(&["count"], vec![vec![json!(3)]])),
    ]));

    let outcome = ask(&agent(&completion, &executor, 3), "count orders").await;

    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("3"));
    assert!(completion.prompts()[1].contains("timed out waiting for the database"));
}

#[tokio::test]
async fn test_completion_timeout_does_not_repeat_earlier_statement() {
    let completion = Arc::new(ScriptedCompletion::new(vec![
        Ok(sql_plan("SELECT sum(totl) FROM orders")),
        Err(AgentError::Timeout("completion".to_string())),
        Ok(answer_plan("I need more details.")),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Err(ExecutionFailure::new(
        SqlErrorClass::UndefinedColumn,
        "column \"totl\" does not exist",
    ))]));

    let outcome = ask(&agent(&completion, &executor, 3), "total of orders").await;

    assert_eq!(outcome.attempts, 3);
    let prompts = completion.prompts();
    assert!(prompts[1].contains("Failed query:\nSELECT sum(totl) FROM orders"));
    assert!(prompts[2].contains("timed out waiting for the language model"));
    assert!(!prompts[2].contains("SELECT sum(totl) FROM orders"));
}

#[tokio::test]
async fn test_completion_timeouts_exhaust_budget() {
    let completion = Arc::new(ScriptedCompletion::slow(Duration::from_secs(5)));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));

    let outcome = ask(&agent(&completion, &executor, 2), "slow question").await;

    assert_eq!(completion.calls(), 2);
    assert!(outcome.budget_exhausted);
    assert_eq!(
        outcome.failure(),
        Some(&FailureCause::Timeout { stage: TimeoutStage::Completion })
    );
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let completion = Arc::new(ScriptedCompletion::texts(&[&sql_plan("SELECT 1")]));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = agent(&completion, &executor, 3).run("anything", &[], &cancel).await;

    assert_eq!(completion.calls(), 0);
    assert_eq!(outcome.state, LoopState::Failed(FailureCause::Cancelled));
    assert!(matches!(outcome.error(), Some(AgentError::Cancelled)));
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_completion() {
    let completion = Arc::new(ScriptedCompletion::slow(Duration::from_secs(5)));
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let sql_agent = SqlAgent::new(
        completion.clone(),
        executor.clone(),
        Arc::new(sample_schema()),
        CompletionConfig::default(),
        datachat::AgentConfig {
            completion_timeout: Duration::from_secs(30),
            ..fast_config(3)
        },
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = sql_agent.run("slow question", &[], &cancel).await;

    assert_eq!(completion.calls(), 1);
    assert_eq!(outcome.failure(), Some(&FailureCause::Cancelled));
}

#[tokio::test]
async fn test_identical_inputs_reach_identical_outcomes() {
    let run_once = || async {
        let completion = Arc::new(ScriptedCompletion::texts(&[
            "not json",
            &sql_plan("SELECT city, sum(total) AS total FROM orders GROUP BY city ORDER BY city"),
        ]));
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(result(
            &["city", "total"],
            vec![vec![json!("Patos"), json!(10)], vec![json!("Uberaba"), json!(20)]],
        ))]));
        ask(&agent(&completion, &executor, 3), "total by city").await
    };

    let first = run_once().await;
    let second = run_once().await;

    assert_eq!(first.state, second.state);
    assert_eq!(first.attempts, second.attempts);
    assert_eq!(first.sql, second.sql);
    let contents = |o: &LoopOutcome| o.transcript.iter().map(|t| t.content.clone()).collect::<Vec<_>>();
    assert_eq!(contents(&first), contents(&second));
    assert_eq!(
        first.answer().map(|a| a.text.as_str()),
        Some("1) city=Patos, total=10\n2) city=Uberaba, total=20")
    );
}
