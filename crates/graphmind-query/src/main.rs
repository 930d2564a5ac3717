//! CLI entry point for the graphmind query pipeline.
//!
//! Prints JSON to stdout; logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use graphmind_core::{QueryRequest, TenantNamespace};
use graphmind_graph::{ConnectionPool, KvClient, PoolConfig};
use graphmind_history::{FileHistoryStore, HistoryQuery, HistoryStore, MemoryHistoryStore};
use graphmind_query::config::{AppConfig, CacheBackend, CacheConfig};
use graphmind_query::{
    validator, AnthropicQueryModel, EntityResolver, MemoryCacheStore, MemoryDirectory,
    QueryCache, QueryEngine, QueryError, QueryGenerator, RespCacheStore,
};

#[derive(Parser)]
#[command(name = "graphmind-query")]
#[command(about = "Answer questions over a tenant's knowledge graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: graphmind).
    #[arg(short, long, default_value = "graphmind", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question and print the formatted result.
    Ask {
        #[arg(long)]
        namespace: String,
        #[arg(long, default_value = "cli")]
        user: String,
        /// Result-size hint, capped at the configured maximum.
        #[arg(long)]
        limit: Option<u32>,
        question: String,
    },
    /// Drop every cached result of a namespace.
    Invalidate {
        #[arg(long)]
        namespace: String,
    },
    /// Check query text against the validator without running it.
    Validate {
        #[arg(long)]
        namespace: String,
        query: String,
    },
    /// Print connection pool counters.
    Status,
    /// List recorded questions for a namespace, newest first.
    History {
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Ask {
            namespace,
            user,
            limit,
            question,
        } => {
            let namespace = TenantNamespace::new(namespace)?;
            let pool = ConnectionPool::connect(config.falkordb.clone()).await?;
            let engine = build_engine(&config, pool.clone()).await?;

            let mut request = QueryRequest::new(question, namespace, user);
            if let Some(limit) = limit {
                request = request.with_parameter("limit", serde_json::json!(limit));
            }
            let outcome = engine.execute_query(request).await;
            pool.close().await;

            match outcome {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "error": e.code(),
                            "message": e.to_string(),
                            "retryable": e.is_retryable(),
                        })
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::Invalidate { namespace } => {
            let namespace = TenantNamespace::new(namespace)?;
            if config.cache.backend == CacheBackend::Memory {
                println!("{}", invalidate_report(&namespace, &CacheBackend::Memory, 0));
                return Ok(());
            }
            let cache = build_cache(&config.cache).await?;
            match cache.invalidate_namespace(&namespace).await.map_err(QueryError::from) {
                Ok(dropped) => {
                    println!("{}", invalidate_report(&namespace, &config.cache.backend, dropped));
                }
                Err(e) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "namespace": namespace,
                            "error": e.code(),
                            "message": e.to_string(),
                            "retryable": e.is_retryable(),
                        })
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::Validate { namespace, query } => {
            let namespace = TenantNamespace::new(namespace)?;
            let verdict = validator::validate(&query, &namespace);
            println!("{}", serde_json::to_string(&verdict)?);
            if !verdict.ok {
                std::process::exit(2);
            }
        }
        Command::Status => {
            let pool = ConnectionPool::connect(config.falkordb.clone()).await?;
            println!("{}", serde_json::to_string(&pool.status())?);
            pool.close().await;
        }
        Command::History {
            namespace,
            user,
            limit,
        } => {
            let Some(dir) = config.history.dir.as_deref() else {
                anyhow::bail!("history.dir is not configured; nothing was persisted");
            };
            let store = FileHistoryStore::new(dir)?;
            let mut query = HistoryQuery::for_namespace(TenantNamespace::new(namespace)?);
            query.user_id = user;
            query.limit = Some(limit);
            println!("{}", serde_json::to_string_pretty(&store.list(&query)?)?);
        }
    }

    Ok(())
}

async fn build_engine(config: &AppConfig, pool: ConnectionPool) -> anyhow::Result<QueryEngine> {
    let directory = match config.directory.path.as_deref() {
        Some(path) => MemoryDirectory::from_json_file(path)?,
        None => {
            tracing::warn!("No entity directory configured; mentions stay unresolved");
            MemoryDirectory::new()
        }
    };
    let resolver = Arc::new(EntityResolver::new(Arc::new(directory), config.resolver.threshold));

    let mut generator = QueryGenerator::new(config.generator.clone(), resolver);
    if config.generator.model.is_configured() {
        let model = AnthropicQueryModel::new(config.generator.model.clone())?;
        generator = generator.with_model(Arc::new(model));
    } else {
        tracing::info!("Generative fallback disabled (no generator.model.api_key)");
    }

    let cache = build_cache(&config.cache).await?;

    let history: Arc<dyn HistoryStore> = match config.history.dir.as_deref() {
        Some(dir) => Arc::new(FileHistoryStore::new(dir)?),
        None => Arc::new(MemoryHistoryStore::new()),
    };

    Ok(QueryEngine::new(generator, Arc::new(pool), cache).with_history(history))
}

async fn build_cache(config: &CacheConfig) -> anyhow::Result<QueryCache> {
    let ttl = Duration::from_secs(config.ttl_secs);
    let cache = match config.backend {
        CacheBackend::Memory => QueryCache::new(Arc::new(MemoryCacheStore::new()), &config.key_prefix, ttl),
        CacheBackend::Redis => {
            let pool = ConnectionPool::connect(PoolConfig {
                host: config.redis_host.clone(),
                port: config.redis_port,
                password: config.redis_password.clone(),
                min_size: 1,
                max_size: 4,
                ..PoolConfig::default()
            })
            .await?;
            let store = RespCacheStore::new(KvClient::new(pool));
            QueryCache::new(Arc::new(store), &config.key_prefix, ttl)
        }
    };
    Ok(cache)
}

/// Output of `invalidate`. The memory backend lives inside one process, so a
/// separate CLI invocation has nothing of another process's to drop.
fn invalidate_report(namespace: &TenantNamespace, backend: &CacheBackend, dropped: u64) -> serde_json::Value {
    let mut report = serde_json::json!({ "namespace": namespace, "dropped": dropped });
    if *backend == CacheBackend::Memory {
        report["note"] = serde_json::json!(
            "memory cache backend is per-process; nothing to invalidate across processes"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_report_explains_memory_backend() {
        let ns = TenantNamespace::new("alice").unwrap();
        let memory = invalidate_report(&ns, &CacheBackend::Memory, 0);
        assert_eq!(memory["dropped"], 0);
        assert!(memory["note"].as_str().unwrap().contains("per-process"));

        let redis = invalidate_report(&ns, &CacheBackend::Redis, 4);
        assert_eq!(redis["namespace"], "alice");
        assert_eq!(redis["dropped"], 4);
        assert!(redis.get("note").is_none());
    }
}
