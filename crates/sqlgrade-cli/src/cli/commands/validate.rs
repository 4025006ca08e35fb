use super::exit_codes;
use crate::cli::args::ValidateArgs;
use serde_json::json;
use sqlgrade_core::config::load_config;
use sqlgrade_core::dataset::load_dataset;
use sqlgrade_core::db::guard::check_read_only;

struct Problem {
    index: Option<usize>,
    question: Option<String>,
    message: String,
}

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let mut problems = Vec::new();

    let cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            problems.push(Problem {
                index: None,
                question: None,
                message: e.to_string(),
            });
            print_report(&args, 0, &problems);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let cases = match load_dataset(&cfg.dataset_path()) {
        Ok(c) => c,
        Err(e) => {
            problems.push(Problem {
                index: None,
                question: None,
                message: e.to_string(),
            });
            print_report(&args, 0, &problems);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    for tc in &cases {
        if let Err(reason) = check_read_only(&tc.expected_query) {
            problems.push(Problem {
                index: Some(tc.index),
                question: Some(tc.question.clone()),
                message: format!("expected query is not read-only: {}", reason),
            });
        }
    }

    if args.execute {
        match super::build_executor(&cfg, &args.db_env).await {
            Ok(executor) => {
                for tc in &cases {
                    if check_read_only(&tc.expected_query).is_err() {
                        continue;
                    }
                    let res = tokio::time::timeout(
                        cfg.settings.timeouts.db(),
                        executor.execute(&tc.expected_query),
                    )
                    .await;
                    let err = match res {
                        Ok(Ok(_)) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(_) => {
                            executor.cancel();
                            Some(format!("timed out after {:?}", cfg.settings.timeouts.db()))
                        }
                    };
                    if let Some(e) = err {
                        problems.push(Problem {
                            index: Some(tc.index),
                            question: Some(tc.question.clone()),
                            message: format!("expected query failed: {}", e),
                        });
                    }
                }
                if let Err(e) = executor.close().await {
                    tracing::warn!(event = "db_close_failed", error = %e);
                }
            }
            Err(e) => problems.push(Problem {
                index: None,
                question: None,
                message: format!("database: {:#}", e),
            }),
        }
    }

    print_report(&args, cases.len(), &problems);
    if problems.is_empty() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::CONFIG_ERROR)
    }
}

fn print_report(args: &ValidateArgs, case_count: usize, problems: &[Problem]) {
    if args.format == "json" {
        let errors: Vec<serde_json::Value> = problems
            .iter()
            .map(|p| {
                json!({
                    "index": p.index,
                    "question": p.question,
                    "message": p.message,
                })
            })
            .collect();
        let output = json!({
            "schema_version": 1,
            "ok": problems.is_empty(),
            "config": args.config,
            "cases": case_count,
            "errors": errors,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("failed to render report: {}", e),
        }
        return;
    }

    if problems.is_empty() {
        eprintln!(
            "✅ {}: {} test cases, all expected queries are single read statements",
            args.config.display(),
            case_count
        );
        return;
    }
    for p in problems {
        match (p.index, &p.question) {
            (Some(i), Some(q)) => eprintln!("❌ case {} ({}): {}", i, q, p.message),
            _ => eprintln!("❌ {}", p.message),
        }
    }
    eprintln!("\n{} problem(s) found", problems.len());
}
