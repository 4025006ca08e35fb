use super::args::*;
use anyhow::Context;
use sqlgrade_core::audit::AuditRecorder;
use sqlgrade_core::chatbot::http::HttpChatbot;
use sqlgrade_core::chatbot::scripted::ScriptedChatbot;
use sqlgrade_core::chatbot::{Chatbot, ChatbotAdapter};
use sqlgrade_core::config::{ChatbotProvider, DbBackend, EmbedderProvider, EvalConfig};
use sqlgrade_core::db::sqlite::SqliteExecutor;
use sqlgrade_core::db::QueryExecutor;
use sqlgrade_core::embeddings::hashing::{HashingEmbedder, DEFAULT_DIMS};
use sqlgrade_core::embeddings::openai::OpenAIEmbedder;
use sqlgrade_core::embeddings::{Embedder, EmbeddingService};
use sqlgrade_core::engine::{RunPolicy, Runner};
use sqlgrade_core::report::console::ConsoleReporter;
use sqlgrade_core::report::json::{JsonReportSink, MultiSink};
use sqlgrade_core::report::ReportSink;
use sqlgrade_core::similarity::{SimilarityScorer, EPSILON};
use sqlgrade_core::storage::Store;
use std::path::Path;
use std::sync::Arc;

pub mod audit;
pub mod validate;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args).await,
        Command::Validate(args) => validate::run(args).await,
        Command::Audit(args) => audit::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    write_sample_config_if_missing(&args.config)?;
    let dir = args
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    if !args.no_demo {
        write_file_if_missing(&dir.join("cases.json"), crate::templates::SAMPLE_DATASET)?;
        write_file_if_missing(&dir.join("replay.jsonl"), crate::templates::SAMPLE_REPLAY)?;

        let db = dir.join("demo.db");
        if !db.exists() {
            sqlgrade_core::db::sqlite::seed_database(&db, crate::templates::DEMO_DB_SQL)?;
            eprintln!("created {}", db.display());
        } else {
            eprintln!("note: {} already exists (skipped)", db.display());
        }
    }

    if args.gitignore {
        write_file_if_missing(&dir.join(".gitignore"), crate::templates::GITIGNORE)?;
    }

    Ok(exit_codes::OK)
}

fn write_file_if_missing(path: &Path, content: &str) -> anyhow::Result<()> {
    ensure_parent_dir(path)?;
    if !path.exists() {
        std::fs::write(path, content)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists (skipped)", path.display());
    }
    Ok(())
}

fn write_sample_config_if_missing(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        ensure_parent_dir(path)?;
        sqlgrade_core::config::write_sample_config(path)?;
        eprintln!("created {}", path.display());
    } else {
        eprintln!("note: {} already exists", path.display());
    }
    Ok(())
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    if let Some(t) = args.fail_under {
        if !(0.0..=1.0).contains(&t) {
            eprintln!("config error: --fail-under must be within [0, 1], got {}", t);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    }

    let mut cfg = match sqlgrade_core::config::load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if let Some(m) = args.min_score {
        cfg.settings.min_score = m;
    }
    if args.sort_rows {
        cfg.settings.sort_rows = true;
    }
    if args.audit_generated {
        cfg.audit.include_generated = true;
    }
    if args.no_audit {
        cfg.audit.enabled = false;
    }
    if let Err(e) = sqlgrade_core::config::validate(&cfg) {
        eprintln!("{}", e);
        return Ok(exit_codes::CONFIG_ERROR);
    }

    let cases = match sqlgrade_core::dataset::load_dataset(&cfg.dataset_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dataset error: {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    ensure_parent_dir(&args.db)?;
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    let runner = match build_runner(store, &cfg, &args).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("setup error: {:#}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(ConsoleReporter::stderr())];
    if let Some(path) = &args.report_json {
        sinks.push(Box::new(JsonReportSink::new(path)));
    }
    let mut sink = MultiSink::new(sinks);

    eprintln!(
        "Running {} test cases from {} (chatbot: {}, embedder: {})\n",
        cases.len(),
        cfg.dataset,
        runner.adapter.provider_name(),
        runner.scorer.model_id()
    );
    let result = runner
        .run_suite(&cfg.suite, &cfg.dataset, &cases, &mut sink)
        .await;

    if let Err(e) = runner.executor.close().await {
        tracing::warn!(event = "db_close_failed", error = %e);
    }

    let artifacts = match result {
        Ok(a) => a,
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    eprintln!("run #{} stored in {}", artifacts.run_id, args.db.display());

    Ok(decide_exit_code(artifacts.summary.grand_score(), args.fail_under))
}

fn decide_exit_code(grand_score: f64, fail_under: Option<f64>) -> i32 {
    match fail_under {
        Some(t) if grand_score + EPSILON < t => {
            eprintln!(
                "grand global score {:.2} is below --fail-under {:.2}",
                grand_score, t
            );
            exit_codes::TEST_FAILED
        }
        _ => exit_codes::OK,
    }
}

async fn build_runner(store: Store, cfg: &EvalConfig, args: &RunArgs) -> anyhow::Result<Runner> {
    let timeouts = &cfg.settings.timeouts;

    let executor = build_executor(cfg, &args.db_env).await?;
    let adapter = build_adapter(cfg)?;

    let embeddings = Arc::new(
        EmbeddingService::new(build_embedder(cfg)?, timeouts.embedder())
            .with_cache(store.clone(), args.refresh_embeddings),
    );
    let audit = if cfg.audit.enabled {
        Some(
            AuditRecorder::new(Arc::new(store.clone()), embeddings.clone())
                .with_timeout(timeouts.audit()),
        )
    } else {
        None
    };

    let policy = RunPolicy {
        min_score: cfg.settings.min_score,
        guard_expected: cfg.database.guard_expected,
        audit_generated: cfg.audit.include_generated,
        db_timeout: timeouts.db(),
    };

    Ok(Runner {
        store,
        executor,
        adapter,
        scorer: SimilarityScorer::new(embeddings, cfg.settings.sort_rows),
        audit,
        policy,
    })
}

pub(crate) async fn build_executor(
    cfg: &EvalConfig,
    env: &DbEnvArgs,
) -> anyhow::Result<Arc<dyn QueryExecutor>> {
    match cfg.database.backend {
        DbBackend::Sqlite => {
            let path = cfg
                .database
                .path
                .as_deref()
                .context("database.path is required for the sqlite backend")?;
            let exec = SqliteExecutor::open(Path::new(path))
                .with_context(|| format!("failed to open database {}", path))?;
            Ok(Arc::new(exec))
        }
        DbBackend::Mysql => build_mysql(cfg, env).await,
    }
}

#[cfg(feature = "mysql")]
async fn build_mysql(cfg: &EvalConfig, env: &DbEnvArgs) -> anyhow::Result<Arc<dyn QueryExecutor>> {
    use sqlgrade_core::db::mysql::MySqlExecutor;
    use sqlgrade_core::db::ConnectionParams;

    if let Some(url) = &cfg.database.url {
        return Ok(Arc::new(MySqlExecutor::connect_url(url).await?));
    }
    let db = &cfg.database;
    let pick = |flag: &Option<String>, file: &Option<String>, name: &str| {
        flag.clone()
            .or_else(|| file.clone())
            .with_context(|| format!("missing database {} (config or SQLGRADE_DB_* env)", name))
    };
    let params = ConnectionParams::new(
        &pick(&env.db_host, &db.host, "host")?,
        &pick(&env.db_user, &db.user, "user")?,
        &pick(&env.db_password, &db.password, "password")?,
        &pick(&env.db_name, &db.database, "name")?,
    );
    tracing::info!(event = "db_connect", url = %params.redacted_url());
    let exec = MySqlExecutor::connect(&params)
        .await
        .with_context(|| format!("failed to connect to {}", params.redacted_url()))?;
    Ok(Arc::new(exec))
}

#[cfg(not(feature = "mysql"))]
async fn build_mysql(_cfg: &EvalConfig, _env: &DbEnvArgs) -> anyhow::Result<Arc<dyn QueryExecutor>> {
    anyhow::bail!("mysql backend not compiled in; rebuild with `--features mysql`")
}

fn build_adapter(cfg: &EvalConfig) -> anyhow::Result<ChatbotAdapter> {
    let c = &cfg.chatbot;
    let chatbot: Arc<dyn Chatbot> = match c.provider {
        ChatbotProvider::Http => {
            let url = c.url.clone().context("chatbot.url is required")?;
            let api_key = c.api_key_env.as_ref().and_then(|k| std::env::var(k).ok());
            Arc::new(
                HttpChatbot::new(url, c.input_field.clone())
                    .with_response_pointer(c.response_pointer.clone())
                    .with_api_key(api_key),
            )
        }
        ChatbotProvider::Replay => {
            let path = c
                .replay_file
                .as_deref()
                .context("chatbot.replay_file is required")?;
            Arc::new(
                ScriptedChatbot::from_path(path)
                    .context("failed to load replay file")?
                    .with_prompt_prefix(c.prompt_prefix.clone()),
            )
        }
    };

    Ok(ChatbotAdapter::new(chatbot)
        .with_prompt_prefix(c.prompt_prefix.clone())
        .with_query_fields(c.query_fields.clone())
        .with_timeout(cfg.settings.timeouts.chatbot()))
}

pub(crate) fn build_embedder(cfg: &EvalConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let e = &cfg.embedder;
    match e.provider {
        EmbedderProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(
            e.dims.unwrap_or(DEFAULT_DIMS),
        ))),
        EmbedderProvider::Openai => {
            let key = std::env::var("OPENAI_EMBEDDING_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .context("OPENAI_EMBEDDING_KEY or OPENAI_API_KEY must be set for the openai embedder")?;
            let mut embedder = OpenAIEmbedder::new(e.model.clone(), key);
            if let Some(base) = &e.base_url {
                embedder = embedder.with_base_url(base.clone());
            }
            Ok(Arc::new(embedder))
        }
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
