use super::exit_codes;
use crate::cli::args::AuditArgs;
use sqlgrade_core::audit::AuditStore;
use sqlgrade_core::embeddings::EmbeddingService;
use sqlgrade_core::model::AuditRecord;
use sqlgrade_core::storage::Store;

pub async fn run(args: AuditArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("no run store at {} (run `sqlgrade run` first)", args.db.display());
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;

    if let Some(name) = &args.test_name {
        let records = store.get_by_test_name(name).await?;
        if records.is_empty() {
            eprintln!("no audit records for test name '{}'", name);
        }
        for r in &records {
            println!("{}", describe(r));
        }
        return Ok(exit_codes::OK);
    }

    if let Some(text) = &args.similar_to {
        let cfg = match sqlgrade_core::config::load_config(&args.config, false) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        let embedder = match super::build_embedder(&cfg) {
            Ok(e) => e,
            Err(e) => {
                eprintln!("setup error: {:#}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        };
        let svc = EmbeddingService::new(embedder, cfg.settings.timeouts.embedder())
            .with_cache(store.clone(), false);
        let vectors = svc.embed_texts(&[text.clone()]).await?;
        let Some(query) = vectors.first() else {
            anyhow::bail!("embedder returned no vector");
        };

        let hits = store.nearest(query, args.k).await?;
        if hits.is_empty() {
            eprintln!("no comparable audit records (model {})", svc.model_id());
        }
        for (r, score) in &hits {
            println!("{:.3}  {}", score, describe(r));
        }
        return Ok(exit_codes::OK);
    }

    let stats = store.stats_best_effort()?;
    println!(
        "runs: {}  results: {}  audit records: {}",
        fmt_count(stats.runs),
        fmt_count(stats.results),
        fmt_count(stats.audit_records)
    );
    for run in store.list_runs(args.last)? {
        let score = match run.summary.as_ref().and_then(|s| s.average) {
            Some(avg) => format!("{:.2}", avg),
            None => "-".to_string(),
        };
        let scored = run
            .summary
            .as_ref()
            .map(|s| format!("{}/{}", s.scored, s.total))
            .unwrap_or_else(|| "-".into());
        println!(
            "#{:<5} {:<10} {:<24} score {:<5} scored {:<7} {}  {}",
            run.id, run.status, run.started_at, score, scored, run.suite, run.dataset
        );
    }
    Ok(exit_codes::OK)
}

fn fmt_count(c: Option<u64>) -> String {
    c.map(|v| v.to_string()).unwrap_or_else(|| "?".into())
}

fn describe(r: &AuditRecord) -> String {
    let doc = r.document.as_deref().unwrap_or("");
    let doc = if doc.chars().count() > 80 {
        format!("{}...", doc.chars().take(80).collect::<String>())
    } else {
        doc.to_string()
    };
    format!(
        "{}  [{}] run={} dims={} at={}  {}",
        r.id,
        r.metadata.kind.as_str(),
        r.metadata
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
        r.embedding.len(),
        r.created_at.as_deref().unwrap_or("-"),
        doc
    )
}

