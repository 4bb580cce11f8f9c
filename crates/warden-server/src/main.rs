use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use warden_core::activity::{ActivityRecord, ActivitySearch};
use warden_core::assignment::{PairFilter, RoleAssignment, TenantRoleFilter, UserRoleAssignment};
use warden_core::rule::RuleFilter;
use warden_server::cli::{Cli, Command};
use warden_server::config::{AppConfig, LogFormat};
use warden_server::{
    ActivityService, ActivitySettings, BackgroundTasks, CacheLayer, CacheSettings,
    MemoryPolicyModel, Metrics, PolicyAdapter, PolicyRuleRepository, StorePolicyAdapter,
};
use warden_storage::{
    AssignmentStore, InMemorySearchIndex, MokaCacheClient, PostgresStore, TenantRoleStore,
};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    let store = Arc::new(
        PostgresStore::connect(
            &config.database.url,
            config.database.replica_url.as_deref(),
            config.database.max_connections,
        )
        .await?,
    );

    let metrics = Arc::new(Metrics::new());
    let tasks = BackgroundTasks::spawn(config.cache.queue_capacity, Arc::clone(&metrics));
    let cache = CacheLayer::new(
        Arc::new(MokaCacheClient::new(config.cache.max_capacity)),
        CacheSettings::from_config(&config.cache),
        tasks.clone(),
        Arc::clone(&metrics),
    );

    let result = match cli.command {
        Command::Migrate => run_migrate(&store).await,
        Command::ExportPolicy => run_export_policy(adapter(&store, cache)).await,
        Command::ImportPolicy { file } => run_import_policy(adapter(&store, cache), &file).await,
        Command::Stats => run_stats(&store, cache).await,
        Command::Activity { user, limit, query } => {
            let activity = ActivityService::<_, _, InMemorySearchIndex>::new(
                Arc::clone(&store),
                None,
                cache,
                ActivitySettings::from_config(&config),
            );
            run_activity(&activity, &user, limit, query).await
        }
    };

    tasks.flush().await;
    metrics.log_summary();
    result
}

type Adapter = StorePolicyAdapter<PostgresStore, MokaCacheClient>;

fn adapter(store: &Arc<PostgresStore>, cache: CacheLayer<MokaCacheClient>) -> Adapter {
    StorePolicyAdapter::new(PolicyRuleRepository::new(Arc::clone(store), cache))
}

async fn run_migrate(store: &PostgresStore) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("running database migrations");
    store.migrate().await?;
    tracing::info!("migrations completed successfully");
    Ok(())
}

async fn run_export_policy(adapter: Adapter) -> Result<(), Box<dyn std::error::Error>> {
    let mut model = MemoryPolicyModel::new();
    adapter.load_policy(&mut model).await?;

    for line in model.lines() {
        println!("{line}");
    }
    Ok(())
}

async fn run_import_policy(
    adapter: Adapter,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)?;
    let mut model = MemoryPolicyModel::new();
    let parsed = model.add_policy_text(&contents)?;

    adapter.save_policy(&model).await?;

    println!("Policy imported successfully");
    println!("  File:  {}", file.display());
    println!("  Rules: {parsed}");
    Ok(())
}

async fn run_stats(
    store: &Arc<PostgresStore>,
    cache: CacheLayer<MokaCacheClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let rules = PolicyRuleRepository::new(Arc::clone(store), cache);
    let rule_count = rules.count(&RuleFilter::default()).await?;
    let p_count = rules.count(&RuleFilter::for_ptype("p")).await?;
    let g_count = rules.count(&RuleFilter::for_ptype("g")).await?;
    let role_permissions = store
        .count_assignments::<RoleAssignment>(&PairFilter::default())
        .await?;
    let user_roles = store
        .count_assignments::<UserRoleAssignment>(&PairFilter::default())
        .await?;
    let tenant_roles = store
        .count_tenant_roles(&TenantRoleFilter::default())
        .await?;

    println!("Policy rules:       {rule_count}");
    println!("  p:                {p_count}");
    println!("  g:                {g_count}");
    println!("Role permissions:   {role_permissions}");
    println!("User roles:         {user_roles}");
    println!("User tenant roles:  {tenant_roles}");
    Ok(())
}

type Activity = ActivityService<PostgresStore, MokaCacheClient, InMemorySearchIndex>;

async fn run_activity(
    activity: &Activity,
    user: &str,
    limit: Option<usize>,
    query: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = match query {
        Some(text) => {
            let mut search = ActivitySearch::new(text);
            search.user_id = Some(user.to_string());
            if let Some(limit) = limit {
                search.size = limit;
            }
            let hits = activity.search(&search).await?;
            println!("Matches: {}", hits.total);
            hits.records
        }
        None => {
            let limit = limit.unwrap_or(activity.settings().recent_limit);
            activity.recent_for_user(user, limit).await?
        }
    };

    for record in &records {
        print_activity(record);
    }
    Ok(())
}

fn print_activity(record: &ActivityRecord) {
    println!(
        "{}  {:<16} {}  ({})",
        record.created_at.to_rfc3339(),
        record.kind,
        record.details,
        record.id
    );
}
