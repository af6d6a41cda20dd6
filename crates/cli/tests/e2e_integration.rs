//! End-to-end tests for the Stepwise agent.
//!
//! These drive a full turn from request to rendered output: a scripted
//! provider plans, the real harness runs built-in tools against a temp
//! directory, and the JSON and text writers render the result.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use stepwise_agent::{
    AgentLoop, Confirmer, Decider, DecisionCache, JsonWriter, SessionHistory, TtyWriter, TurnOutcome,
};
use stepwise_config::{AppConfig, Overrides};
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use stepwise_core::risk::RiskLevel;
use stepwise_exec::{CachedCatalog, CleanupRegistry, FsCatalog, Harness, UnitRunner};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Returns scripted replies in order and remembers every prompt.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }

    fn next(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::EmptyResponse("e2e_mock".into()))
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    fn default_model(&self) -> &str {
        "mock-1"
    }

    async fn complete(&self, prompt: &str, options: &AskOptions) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: self.next(prompt)?,
            provider: self.name().into(),
            model: options.model_or(self.default_model()).into(),
        })
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &AskOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let text = self.next(prompt)?;
        for word in text.split_inclusive(' ') {
            on_token(word);
        }
        Ok(Completion {
            text,
            provider: self.name().into(),
            model: options.model_or(self.default_model()).into(),
        })
    }
}

/// Answers every confirmation with a fixed reply and counts the questions.
struct FixedConfirmer {
    reply: bool,
    asked: usize,
}

impl FixedConfirmer {
    fn yes() -> Self {
        Self { reply: true, asked: 0 }
    }

    fn no() -> Self {
        Self { reply: false, asked: 0 }
    }
}

impl Confirmer for FixedConfirmer {
    fn confirm_action(&mut self, _risk: RiskLevel) -> bool {
        self.asked += 1;
        self.reply
    }

    fn confirm_more(&mut self, _prompt: &str) -> bool {
        self.asked += 1;
        self.reply
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("units")).unwrap();
    std::fs::create_dir(dir.path().join("tmp")).unwrap();
    std::fs::write(
        dir.path().join("units/01_Db_Toolkit.ps1"),
        "function Set-Row {\n param([Parameter(Mandatory)]$Table, [Parameter(Mandatory)]$Value)\n}\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("quarterly-report.pdf"), "q3 numbers").unwrap();
    std::fs::write(dir.path().join("report-draft.txt"), "draft").unwrap();
    std::fs::write(dir.path().join("notes.md"), "misc").unwrap();
    dir
}

fn agent(dir: &Path, provider: Arc<ScriptedProvider>) -> AgentLoop {
    let cleanup = Arc::new(CleanupRegistry::with_temp_dir(dir.join("tmp")));
    let catalog = Arc::new(CachedCatalog::new(FsCatalog::new()));
    let runner = UnitRunner::new(catalog, cleanup);
    let harness = Arc::new(Harness::new(runner, Arc::new(stepwise_tools::default_registry())));
    let decider = Decider::new(provider, AskOptions::new("ollama").with_model("llama3"))
        .with_cache(Arc::new(DecisionCache::new()));
    AgentLoop::new(decider, harness, dir)
        .with_confirm_tools(false)
        .with_env_context(format!("- Working directory: {}", dir.display()))
}

const SEARCH_REPORT: &str =
    r#"{"action":"run_tool","tool":"search","tool_args":{"name":"report","ext":"pdf"},"reason":"find it","answer":"Looking."}"#;

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_then_answer_in_json_mode() {
    let dir = workspace();
    let provider = ScriptedProvider::new(&[
        SEARCH_REPORT,
        r#"{"action":"answer","answer":"Your report is quarterly-report.pdf."}"#,
    ]);
    let mut agent = agent(dir.path(), provider.clone()).with_json_mode(true);
    let mut session = SessionHistory::new();
    let mut writer = JsonWriter::new(Vec::new());
    let mut confirmer = FixedConfirmer::yes();

    let report = agent
        .run_turn("list files named report as pdf", &mut session, &mut writer, &mut confirmer)
        .await;

    assert_eq!(report.outcome, TurnOutcome::Answered);
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(confirmer.asked, 0);
    assert!(provider.prompt(1).contains("quarterly-report.pdf"));
    assert!(!provider.prompt(1).contains("report-draft.txt"));
    assert!(!report.records[0].is_error());

    let json: serde_json::Value = serde_json::from_slice(&writer.into_inner()).unwrap();
    assert_eq!(json["provider"], "e2e_mock");
    assert_eq!(json["model"], "llama3");
    assert_eq!(json["action"], "answer");
    assert_eq!(json["answer"], "Your report is quarterly-report.pdf.");
    assert_eq!(json["steps"][0]["action"], "run_tool");
    assert_eq!(json["steps"][0]["target"], "search");
    assert_eq!(json["steps"][0]["status"], "ok");
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn missing_mandatory_parameters_are_fed_back() {
    let dir = workspace();
    let provider = ScriptedProvider::new(&[
        r#"{"action":"run_unit","unit":"Set-Row","unit_args":{"Table":"users"}}"#,
        r#"{"action":"answer","answer":"Which value should the row get?"}"#,
    ]);
    let mut agent = agent(dir.path(), provider.clone());
    let mut session = SessionHistory::new();
    let mut writer = TtyWriter::new(Vec::new());
    let mut confirmer = FixedConfirmer::yes();

    let report = agent
        .run_turn("set a row in users", &mut session, &mut writer, &mut confirmer)
        .await;

    assert_eq!(report.outcome, TurnOutcome::Answered);
    assert_eq!(report.records.len(), 1);
    assert!(report.records[0].is_error());
    assert!(provider.prompt(1).contains("requires mandatory parameters: Value"));
    assert_eq!(confirmer.asked, 0);

    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert!(text.contains("Which value should the row get?"));
    // no temp script was written for a unit that never ran
    assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
}

#[tokio::test]
async fn declined_high_risk_clean_cancels() {
    let dir = workspace();
    let provider = ScriptedProvider::new(&[
        r#"{"action":"run_tool","tool":"clean","tool_args":{"apply":"true"},"answer":"Cleaning up."}"#,
    ]);
    let mut agent = agent(dir.path(), provider.clone());
    let mut session = SessionHistory::new();
    let mut writer = TtyWriter::new(Vec::new());
    let mut confirmer = FixedConfirmer::no();

    let report = agent
        .run_turn("clean this folder", &mut session, &mut writer, &mut confirmer)
        .await;

    assert_eq!(report.outcome, TurnOutcome::Canceled);
    assert_eq!(confirmer.asked, 1);
    assert_eq!(provider.calls(), 1);
    assert!(dir.path().join("tmp").exists());

    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert!(text.contains("Risk: HIGH"));
    assert!(text.contains("Canceled."));
}

#[tokio::test]
async fn unparseable_reply_is_repaired() {
    let dir = workspace();
    let provider = ScriptedProvider::new(&[
        "Sure! I think the answer is 4.",
        r#"{"action":"answer","answer":"4"}"#,
    ]);
    let mut agent = agent(dir.path(), provider.clone()).with_json_mode(true);
    let mut session = SessionHistory::new();
    let mut writer = JsonWriter::new(Vec::new());
    let mut confirmer = FixedConfirmer::yes();

    let report = agent.run_turn("2+2?", &mut session, &mut writer, &mut confirmer).await;

    assert_eq!(report.outcome, TurnOutcome::Answered);
    assert_eq!(provider.calls(), 2);
    assert_eq!(writer.result().answer, "4");
}

#[tokio::test]
async fn session_carries_results_into_the_next_turn() {
    let dir = workspace();
    let provider = ScriptedProvider::new(&[
        SEARCH_REPORT,
        r#"{"action":"answer","answer":"Found one report."}"#,
        r#"{"action":"answer","answer":"It holds q3 numbers."}"#,
    ]);
    let mut agent = agent(dir.path(), provider.clone());
    let mut session = SessionHistory::new();
    let mut confirmer = FixedConfirmer::yes();

    let mut writer = TtyWriter::new(Vec::new());
    agent
        .run_turn("find my report", &mut session, &mut writer, &mut confirmer)
        .await;
    let mut writer = TtyWriter::new(Vec::new());
    let report = agent
        .run_turn("what is in it?", &mut session, &mut writer, &mut confirmer)
        .await;

    assert_eq!(report.outcome, TurnOutcome::Answered);
    let prompt = provider.prompt(2);
    assert!(prompt.contains("find my report"));
    assert!(prompt.contains("quarterly-report.pdf"));
    assert!(prompt.contains("what is in it?"));
}

#[test]
fn interrupt_cleanup_sweeps_leftover_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let leftover = dir.path().join("stepwise-unit-1234.ps1");
    std::fs::write(&leftover, "Write-Output hi").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&leftover)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3600))
        .unwrap();
    std::fs::write(dir.path().join("keep.ps1"), "Write-Output keep").unwrap();

    let cleanup = CleanupRegistry::with_temp_dir(dir.path());
    let hook = Arc::new(Mutex::new(false));
    let flag = hook.clone();
    cleanup.on_cleanup(move || *flag.lock().unwrap() = true);

    assert_eq!(cleanup.run_once(), 1);
    assert_eq!(cleanup.run_once(), 0);
    assert!(*hook.lock().unwrap());
    assert!(!dir.path().join("stepwise-unit-1234.ps1").exists());
    assert!(dir.path().join("keep.ps1").exists());
}

#[test]
fn config_file_env_and_flags_layer_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "default_provider = \"ollama\"\n\n[ollama]\nmodel = \"from-file\"\n\n[agent]\nrisk_policy = \"strict\"\n",
    )
    .unwrap();

    let mut config = AppConfig::load_from(&path).unwrap();
    assert_eq!(config.ollama.model, "from-file");

    config.apply_env_with(|key| match key {
        "STEPWISE_MODEL" => Some("from-env".into()),
        "STEPWISE_RISK_POLICY" => Some("off".into()),
        _ => None,
    });
    assert_eq!(config.ollama.model, "from-env");

    config.apply_overrides(&Overrides {
        model: Some("from-flag".into()),
        risk_policy: Some("normal".into()),
        ..Overrides::default()
    });
    config.validate().unwrap();
    assert_eq!(config.ollama.model, "from-flag");
    assert_eq!(config.agent.risk_policy, "normal");

    let session = stepwise_providers::build_from_config(&config).unwrap();
    assert_eq!(session.kind.as_str(), "ollama");
    assert_eq!(session.options.model, "from-flag");
}
