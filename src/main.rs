// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use quota_match::{
    count_rows, insert_payroll_items, insert_rate_entries, load_payroll_csv, load_quota_csv,
    logging, setup_database, table_columns, AppConfig, BatchRunner, CategoryRegistry,
    DecisionPolicy, EffectiveDateResolver, MatchEngine, PayrollSource,
    RateTableSource, SqliteStore, Table,
};

/// Match piecework payroll lines against the quota table in effect
#[derive(Parser, Debug)]
#[command(name = "quota-match")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./quota-match.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the lines of one payroll file with their matching quotas
    Match {
        /// File identifier prefix, e.g. 202006.xls or 202006
        prefix: String,
        /// Restrict to one sheet/category
        category: Option<String>,
    },

    /// Run filter + decision over many lines and print a summary
    Batch {
        /// File identifier prefix (all files when omitted)
        prefix: Option<String>,
        /// Restrict to one sheet/category
        category: Option<String>,
        /// Maximum number of lines (overrides the config)
        #[arg(long, conflicts_with = "all")]
        limit: Option<usize>,
        /// Process every line regardless of the configured limit
        #[arg(long)]
        all: bool,
        /// Decision policy (overrides the config)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<DecisionPolicy>,
    },

    /// Show which quota version applies to a file and sheet
    Resolve {
        /// Payroll file identifier, e.g. 202101_1.xls
        identifier: String,
        /// Sheet/category name
        category: String,
    },

    /// List registered sheets with their versions and member labels
    Categories,

    /// Import payroll and/or quota rows from CSV files
    Import {
        #[arg(long)]
        payroll: Option<PathBuf>,
        #[arg(long)]
        quota: Option<PathBuf>,
    },

    /// Show the structure and size of the payroll and quota tables
    Inspect,

    /// Browse match results interactively
    #[cfg(feature = "tui")]
    Browse {
        prefix: String,
        category: Option<String>,
    },
}

fn parse_policy(value: &str) -> Result<DecisionPolicy, String> {
    match value {
        "pending" => Ok(DecisionPolicy::Pending),
        "single_candidate" | "single-candidate" => Ok(DecisionPolicy::SingleCandidate),
        other => Err(format!(
            "unknown policy '{}' (expected pending or single_candidate)",
            other
        )),
    }
}

fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    let registry = config.load_registry()?;

    match cli.command {
        Command::Match { prefix, category } => {
            run_match(&config, &registry, &prefix, category.as_deref())?
        }
        Command::Batch {
            prefix,
            category,
            limit,
            all,
            policy,
        } => {
            let limit = if all { None } else { limit.or(config.batch_limit) };
            let policy = policy.unwrap_or(config.decision_policy);
            run_batch(&config, &registry, prefix.as_deref(), category.as_deref(), limit, policy)?
        }
        Command::Resolve {
            identifier,
            category,
        } => run_resolve(&registry, &identifier, &category),
        Command::Categories => run_categories(&registry),
        Command::Import { payroll, quota } => {
            run_import(&config.database_path, payroll.as_deref(), quota.as_deref())?
        }
        Command::Inspect => run_inspect(&config.database_path)?,
        #[cfg(feature = "tui")]
        Command::Browse { prefix, category } => {
            run_browse(&config, &registry, &prefix, category.as_deref())?
        }
    }

    Ok(())
}

fn open_store(database_path: &Path) -> Result<SqliteStore> {
    if !database_path.exists() {
        anyhow::bail!(
            "database not found: {:?} (run `quota-match import` or set {})",
            database_path,
            quota_match::config::DATABASE_ENV
        );
    }
    SqliteStore::open(database_path)
}

fn run_match(
    config: &AppConfig,
    registry: &CategoryRegistry,
    prefix: &str,
    category: Option<&str>,
) -> Result<()> {
    println!("{}", "=".repeat(60));
    println!("工资记录与定额数据匹配程序");
    println!("{}", "=".repeat(60));

    let store = open_store(&config.database_path)?;
    let snapshot = store.load_all();
    println!("获取到 {} 条定额记录\n", snapshot.len());

    let engine = MatchEngine::new(registry);
    let mut shown = 0;

    for line_item in store.for_file(Some(prefix), category) {
        shown += 1;
        println!("当前工资记录:");
        println!("{}", line_item);

        if !line_item.has_quoted_rate() {
            println!("  → 定额为0，跳过匹配\n");
            continue;
        }

        match engine.filter(&snapshot, &line_item, &line_item.file_name) {
            Ok(outcome) => {
                println!("过滤结果 (effected_from = {}):", outcome.version.as_deref().unwrap_or("-"));
                println!("  过滤条件1匹配的记录数: {}", outcome.stage1_count);
                println!("  过滤条件1+2匹配的记录数: {}", outcome.stage2_count);
                if outcome.has_candidates() {
                    println!("\n匹配的定额记录:");
                    for entry in &outcome.candidates {
                        println!("{}", entry);
                    }
                } else {
                    println!("  没有匹配的定额记录");
                }
            }
            Err(e) => println!("  → 处理错误: {}", e),
        }
        println!();
    }

    if shown == 0 {
        println!("没有找到文件 {} 的工资记录", prefix);
    } else {
        println!("所有工资记录已处理完毕！(共 {} 条)", shown);
    }

    Ok(())
}

fn run_batch(
    config: &AppConfig,
    registry: &CategoryRegistry,
    prefix: Option<&str>,
    category: Option<&str>,
    limit: Option<usize>,
    policy: DecisionPolicy,
) -> Result<()> {
    println!("{}", "=".repeat(60));
    println!("批量匹配程序 - Batch Matching Program");
    println!("{}", "=".repeat(60));

    let store = open_store(&config.database_path)?;
    let snapshot = store.load_all();
    println!("获取到 {} 条定额记录", snapshot.len());
    info!(policy = policy.as_str(), "decision policy");

    let decision = policy.stage();
    let runner = BatchRunner::new(MatchEngine::new(registry), decision.as_ref()).with_limit(limit);

    let (counts, limit_reached) =
        runner.run_with(&snapshot, store.for_file(prefix, category), |line| {
            println!("\n处理记录 #{}:", line.ordinal);
            println!("  文件名: {}", line.file_name);
            println!("  工作表名: {}", line.sheet_name);
            println!("  职员: {}", line.employee);
            println!("  定额: {}", line.quoted_rate);
            if let Some(filter) = line.outcome.filter() {
                println!(
                    "  过滤结果: 条件1={}, 条件1+2={}",
                    filter.stage1_count, filter.stage2_count
                );
            }
            println!("  → {}", line.outcome.describe());
        });

    if limit_reached {
        println!("\n处理完成 (限制前{}条记录)", counts.processed);
    } else {
        println!("\n所有记录已处理完毕 (共 {} 条记录)", counts.processed);
    }

    println!("\n{}", counts.summary());

    Ok(())
}

fn run_resolve(registry: &CategoryRegistry, identifier: &str, category: &str) {
    let resolver = EffectiveDateResolver::new(registry);

    println!("文件名: {}", identifier);
    println!("工作表名: {}", category);

    match resolver.resolve(identifier, category) {
        Ok(version) => println!("生效版本: {}", version),
        Err(e) => println!("❌ {}", e),
    }

    match registry.version_tokens(category) {
        Some(tokens) => println!("可用的生效日期: {}", tokens.join(", ")),
        None => {
            let known: Vec<&str> = registry.categories().collect();
            println!("可用的工作表名称: {}", known.join(", "));
        }
    }
}

fn run_categories(registry: &CategoryRegistry) {
    println!("当前 category_mapping 配置 ({} 个工作表):", registry.category_count());

    for category in registry.categories() {
        println!("  {}:", category);
        if let Some(versions) = registry.versions(category) {
            for (token, labels) in versions {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                println!("    {} → [{}]", token, labels.join(", "));
            }
        }
    }
}

fn run_import(database_path: &Path, payroll: Option<&Path>, quota: Option<&Path>) -> Result<()> {
    if payroll.is_none() && quota.is_none() {
        println!("Nothing to import: pass --payroll <csv> and/or --quota <csv>");
        return Ok(());
    }

    let store = SqliteStore::open(database_path)?;
    setup_database(store.connection())?;
    println!("✓ Database ready: {:?}", database_path);

    if let Some(path) = payroll {
        let items = load_payroll_csv(path)?;
        println!("📂 Loaded {} payroll lines from {:?}", items.len(), path);
        let stats = insert_payroll_items(store.connection(), &items)?;
        println!("✓ Inserted: {} (skipped duplicates: {})", stats.inserted, stats.duplicates);
    }

    if let Some(path) = quota {
        let entries = load_quota_csv(path)?;
        println!("📂 Loaded {} quota rows from {:?}", entries.len(), path);
        let stats = insert_rate_entries(store.connection(), &entries)?;
        println!("✓ Inserted: {} (skipped duplicates: {})", stats.inserted, stats.duplicates);
    }

    Ok(())
}

fn run_inspect(database_path: &Path) -> Result<()> {
    let store = open_store(database_path)?;

    for table in Table::all() {
        println!("Table structure for {}:", table.name());
        println!("{}", "-".repeat(50));

        let columns = table_columns(store.connection(), table)?;
        if columns.is_empty() {
            println!("(table does not exist)\n");
            continue;
        }
        for col in &columns {
            println!("Column {}: {} ({})", col.position, col.name, col.declared_type);
        }
        println!("Rows: {}\n", count_rows(store.connection(), table)?);
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_browse(
    config: &AppConfig,
    registry: &CategoryRegistry,
    prefix: &str,
    category: Option<&str>,
) -> Result<()> {
    let store = open_store(&config.database_path)?;
    let snapshot = store.load_all();

    let decision = config.decision_policy.stage();
    let runner = BatchRunner::new(MatchEngine::new(registry), decision.as_ref());
    let report = runner.run(&snapshot, store.for_file(Some(prefix), category));

    if report.lines.is_empty() {
        println!("没有找到文件 {} 的工资记录", prefix);
        return Ok(());
    }

    let title = match category {
        Some(c) => format!("{} / {}", prefix, c),
        None => prefix.to_string(),
    };

    let mut app = ui::App::new(title, report);
    ui::run_ui(&mut app)?;

    Ok(())
}
