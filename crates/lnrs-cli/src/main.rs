use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lnrs_backup::{detect_backup_mode, BackupConfig, BackupManager, BackupMode, DEFAULT_RETENTION};
use lnrs_core::{
    EntityId, EntityType, FieldMap, FieldValue, LookupKind, OperationType, RelationshipSet,
    SnapshotFilter,
};
use lnrs_store_sqlite::{HabitatLinkKind, SqliteStore};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "lnrs.cli.v1";

#[derive(Debug, Parser)]
#[command(name = "lnrs")]
#[command(about = "Local Nature Recovery Strategy registry CLI")]
struct Cli {
    #[arg(long, default_value = "./lnrs.sqlite3")]
    db: PathBuf,

    #[arg(long, default_value = "./backups")]
    backup_dir: PathBuf,

    /// Snapshot mode; `auto` inspects the hosting environment.
    #[arg(long, value_enum, default_value_t = BackupsArg::Auto)]
    backups: BackupsArg,

    #[arg(long, default_value_t = DEFAULT_RETENTION)]
    retention: usize,

    /// Log filter used when `RUST_LOG` is unset. Logs go to stderr.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackupsArg {
    Auto,
    On,
    Off,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Entity {
        #[command(subcommand)]
        command: Box<EntityCommand>,
    },
    Lookup {
        #[command(subcommand)]
        command: LookupCommand,
    },
    Link {
        #[command(subcommand)]
        command: Box<LinkCommand>,
    },
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Init,
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum EntityCommand {
    Create(EntityCreateArgs),
    Get(EntityRefArgs),
    List(EntityTypeArgs),
    Count(EntityTypeArgs),
    Links(EntityLinksArgs),
    Dependents(EntityRefArgs),
    Update(EntityUpdateArgs),
    Delete(EntityDeleteArgs),
}

#[derive(Debug, Args)]
struct EntityTypeArgs {
    #[arg(value_parser = parse_entity_type)]
    entity_type: EntityType,
}

#[derive(Debug, Args)]
struct EntityRefArgs {
    #[arg(value_parser = parse_entity_type)]
    entity_type: EntityType,
    id: String,
}

#[derive(Debug, Args)]
struct EntityLinksArgs {
    #[command(flatten)]
    target: EntityRefArgs,
    /// Only this relationship category; all categories otherwise.
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct EntityCreateArgs {
    #[arg(value_parser = parse_entity_type)]
    entity_type: EntityType,
    #[arg(long)]
    id: Option<String>,
    /// `column=value`; an empty value stores NULL.
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, FieldValue)>,
}

#[derive(Debug, Args)]
struct EntityUpdateArgs {
    #[command(flatten)]
    target: EntityRefArgs,
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, FieldValue)>,
    /// `category=id,id,...` replaces the category; `category=` clears it.
    #[arg(long = "set", value_parser = parse_relationship_set)]
    relationships: Vec<RelationshipSet>,
}

#[derive(Debug, Args)]
struct EntityDeleteArgs {
    #[command(flatten)]
    target: EntityRefArgs,
    /// Without this flag only the rows that would be removed are reported.
    #[arg(long, default_value_t = false)]
    yes: bool,
}

#[derive(Debug, Subcommand)]
enum LookupCommand {
    Add(LookupAddArgs),
}

#[derive(Debug, Args)]
struct LookupAddArgs {
    #[arg(value_parser = parse_lookup_kind)]
    kind: LookupKind,
    label: String,
}

#[derive(Debug, Subcommand)]
enum LinkCommand {
    MapCreate(MapLinkArgs),
    MapDelete(MapLinkArgs),
    MapBulk(MapBulkArgs),
    MapList(MapListArgs),
    GrantAdd(GrantLinkArgs),
    GrantRemove(GrantLinkArgs),
    SapCreate(SapLinkArgs),
    SapDelete(SapLinkArgs),
    HabitatCreate(HabitatLinkArgs),
    HabitatDelete(HabitatLinkArgs),
    FundingAdd(FundingAddArgs),
}

#[derive(Debug, Args)]
struct MapLinkArgs {
    #[arg(long)]
    measure: i64,
    #[arg(long)]
    area: i64,
    #[arg(long)]
    priority: i64,
}

#[derive(Debug, Args)]
struct MapBulkArgs {
    #[arg(long = "measure", value_delimiter = ',', required = true)]
    measures: Vec<i64>,
    #[arg(long = "area", value_delimiter = ',', required = true)]
    areas: Vec<i64>,
    #[arg(long = "priority", value_delimiter = ',', required = true)]
    priorities: Vec<i64>,
}

#[derive(Debug, Args)]
struct MapListArgs {
    #[arg(long)]
    measure: Option<i64>,
}

#[derive(Debug, Args)]
struct GrantLinkArgs {
    #[command(flatten)]
    link: MapLinkArgs,
    #[arg(long)]
    grant: String,
}

#[derive(Debug, Args)]
struct SapLinkArgs {
    #[arg(long)]
    species: i64,
    #[arg(long)]
    area: i64,
    #[arg(long)]
    priority: i64,
}

#[derive(Debug, Args)]
struct HabitatLinkArgs {
    #[arg(value_parser = parse_habitat_kind)]
    kind: HabitatLinkKind,
    #[arg(long)]
    habitat: i64,
    #[arg(long)]
    area: i64,
}

#[derive(Debug, Args)]
struct FundingAddArgs {
    #[arg(long)]
    area: i64,
    #[arg(long)]
    scheme: String,
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    Create(SnapshotCreateArgs),
    List(SnapshotListArgs),
    Restore(SnapshotIdArgs),
    Cleanup(SnapshotCleanupArgs),
    Delete(SnapshotIdArgs),
}

#[derive(Debug, Args)]
struct SnapshotCreateArgs {
    #[arg(long, default_value = "Manual snapshot")]
    description: String,
}

#[derive(Debug, Args)]
struct SnapshotListArgs {
    #[arg(long, value_parser = parse_operation_type)]
    operation: Option<OperationType>,
    #[arg(long, value_parser = parse_entity_type)]
    entity_type: Option<EntityType>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct SnapshotIdArgs {
    snapshot_id: String,
}

#[derive(Debug, Args)]
struct SnapshotCleanupArgs {
    /// Defaults to `--retention`.
    #[arg(long)]
    keep: Option<usize>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match &cli.command {
        Command::Db { command } => run_db(&cli, command),
        Command::Entity { command } => run_entity(&cli, command),
        Command::Lookup { command } => run_lookup(&cli, command),
        Command::Link { command } => run_link(&cli, command),
        Command::Snapshot { command } => run_snapshot(&cli, command),
    }
}

fn open_store(db: &Path) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(db)?;
    store
        .migrate()
        .with_context(|| format!("failed to migrate database {}", db.display()))?;
    Ok(store)
}

fn backup_manager(cli: &Cli) -> BackupManager {
    let mode = match cli.backups {
        BackupsArg::On => BackupMode::Enabled,
        BackupsArg::Off => BackupMode::Disabled,
        BackupsArg::Auto => {
            let cwd = std::env::current_dir().unwrap_or_else(|err| {
                tracing::warn!("failed to read working directory, skipping path heuristics: {err}");
                PathBuf::new()
            });
            let (mode, reason) = detect_backup_mode(|key| std::env::var(key).ok(), &cwd);
            tracing::info!(?mode, ?reason, "detected backup mode");
            mode
        }
    };
    let mut config = BackupConfig::new(&cli.db, &cli.backup_dir).with_mode(mode);
    config.retention = cli.retention;
    BackupManager::new(config)
}

fn run_db(cli: &Cli, command: &DbCommand) -> Result<()> {
    match command {
        DbCommand::Init => {
            let store = open_store(&cli.db)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "status": "initialized",
                "db": cli.db,
                "schema_version": status.current_version
            }))
        }
        DbCommand::SchemaVersion => {
            let store = SqliteStore::open(&cli.db)?;
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(args, &cli.db),
        DbCommand::IntegrityCheck => {
            let store = SqliteStore::open(&cli.db)?;
            let report = store.integrity_check()?;
            emit_json(serde_json::json!({
                "healthy": report.is_healthy(),
                "report": report
            }))
        }
        DbCommand::Backup(args) => {
            let store = SqliteStore::open(&cli.db)?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "status": "backup_written",
                "out": args.out
            }))
        }
    }
}

fn run_db_migrate(args: &DbMigrateArgs, db: &Path) -> Result<()> {
    let mut store = SqliteStore::open(db)?;
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "after_version": after.current_version,
        "applied_versions": before.pending_versions
    }))
}

fn run_entity(cli: &Cli, command: &EntityCommand) -> Result<()> {
    match command {
        EntityCommand::Create(args) => {
            let store = open_store(&cli.db)?;
            let id = args
                .id
                .as_deref()
                .map(|raw| args.entity_type.parse_id(raw))
                .transpose()?;
            let fields: FieldMap = args.fields.iter().cloned().collect();
            let id = store.create_entity(args.entity_type, id, &fields)?;
            emit_json(serde_json::json!({
                "status": "created",
                "entity_type": args.entity_type,
                "id": id
            }))
        }
        EntityCommand::Get(args) => {
            let store = open_store(&cli.db)?;
            let id = args.entity_type.parse_id(&args.id)?;
            let record = store.get_entity(args.entity_type, &id)?;
            emit_json(serde_json::to_value(record)?)
        }
        EntityCommand::List(args) => {
            let store = open_store(&cli.db)?;
            let records = store.list_entities(args.entity_type)?;
            emit_json(serde_json::json!({
                "entity_type": args.entity_type,
                "count": records.len(),
                "records": records
            }))
        }
        EntityCommand::Links(args) => {
            let store = open_store(&cli.db)?;
            let entity_type = args.target.entity_type;
            let id = entity_type.parse_id(&args.target.id)?;
            let relationships = match &args.category {
                Some(category) => {
                    let members = store.relationships(entity_type, &id, category)?;
                    let mut map = serde_json::Map::new();
                    map.insert(category.clone(), serde_json::to_value(members)?);
                    Value::Object(map)
                }
                None => serde_json::to_value(store.all_relationships(entity_type, &id)?)?,
            };
            emit_json(serde_json::json!({
                "entity_type": entity_type,
                "id": id,
                "relationships": relationships
            }))
        }
        EntityCommand::Count(args) => {
            let store = open_store(&cli.db)?;
            emit_json(serde_json::json!({
                "entity_type": args.entity_type,
                "count": store.count_entities(args.entity_type)?
            }))
        }
        EntityCommand::Dependents(args) => {
            let store = open_store(&cli.db)?;
            let id = args.entity_type.parse_id(&args.id)?;
            emit_json(serde_json::json!({
                "entity_type": args.entity_type,
                "id": id,
                "dependents": store.dependent_counts(args.entity_type, &id)?
            }))
        }
        EntityCommand::Update(args) => run_entity_update(cli, args),
        EntityCommand::Delete(args) => run_entity_delete(cli, args),
    }
}

fn run_entity_update(cli: &Cli, args: &EntityUpdateArgs) -> Result<()> {
    let entity_type = args.target.entity_type;
    let id = entity_type.parse_id(&args.target.id)?;
    let fields: FieldMap = args.fields.iter().cloned().collect();

    let mut store = open_store(&cli.db)?;
    store
        .check_update(entity_type, &id, &fields, &args.relationships)
        .with_context(|| format!("failed to update {entity_type} {id}"))?;

    let snapshot_id = backup_manager(cli).try_snapshot(
        &format!("Before updating {entity_type} {id}"),
        OperationType::Update,
        Some(entity_type),
        Some(&id),
    );

    let report = store
        .update_with_relationships(entity_type, &id, &fields, &args.relationships)
        .with_context(|| format!("failed to update {entity_type} {id}"))?;
    emit_json(serde_json::json!({
        "status": "updated",
        "entity_type": entity_type,
        "id": id,
        "report": report,
        "snapshot_id": snapshot_id
    }))
}

fn run_entity_delete(cli: &Cli, args: &EntityDeleteArgs) -> Result<()> {
    let entity_type = args.target.entity_type;
    let id = entity_type.parse_id(&args.target.id)?;

    let store = open_store(&cli.db)?;
    if !store.entity_exists(entity_type, &id)? {
        return Err(anyhow!("cannot delete {entity_type} {id}: not found"));
    }
    if !args.yes {
        return emit_json(serde_json::json!({
            "status": "confirmation_required",
            "entity_type": entity_type,
            "id": id,
            "dependents": store.dependent_counts(entity_type, &id)?
        }));
    }

    let snapshot_id = backup_manager(cli).try_snapshot(
        &format!("Before deleting {entity_type} {id}"),
        OperationType::Delete,
        Some(entity_type),
        Some(&id),
    );

    let report = store
        .delete_with_cascade(entity_type, &id)
        .with_context(|| format!("failed to delete {entity_type} {id}; it is safe to retry"))?;
    emit_json(serde_json::json!({
        "status": "deleted",
        "report": report,
        "total_removed": report.total_removed(),
        "snapshot_id": snapshot_id
    }))
}

fn run_lookup(cli: &Cli, command: &LookupCommand) -> Result<()> {
    match command {
        LookupCommand::Add(args) => {
            let store = open_store(&cli.db)?;
            let id = store.create_lookup(args.kind, &args.label)?;
            emit_json(serde_json::json!({
                "status": "created",
                "kind": args.kind,
                "id": id
            }))
        }
    }
}

fn run_link(cli: &Cli, command: &LinkCommand) -> Result<()> {
    let mut store = open_store(&cli.db)?;
    let result = match command {
        LinkCommand::MapCreate(args) => serde_json::json!({
            "created": store.create_measure_area_priority_link(args.measure, args.area, args.priority)?
        }),
        LinkCommand::MapDelete(args) => {
            let snapshot_id = backup_manager(cli).try_snapshot(
                &format!(
                    "Before deleting link measure {} area {} priority {}",
                    args.measure, args.area, args.priority
                ),
                OperationType::Delete,
                None,
                None,
            );
            let report =
                store.delete_measure_area_priority_link(args.measure, args.area, args.priority)?;
            serde_json::json!({ "report": report, "snapshot_id": snapshot_id })
        }
        LinkCommand::MapBulk(args) => serde_json::to_value(
            store.bulk_create_measure_area_priority_links(&args.measures, &args.areas, &args.priorities)?,
        )?,
        LinkCommand::MapList(args) => {
            let links = store.measure_area_priority_links(args.measure)?;
            serde_json::json!({ "count": links.len(), "links": links })
        }
        LinkCommand::GrantAdd(args) => serde_json::json!({
            "created": store.add_grant_to_link(args.link.measure, args.link.area, args.link.priority, &args.grant)?
        }),
        LinkCommand::GrantRemove(args) => serde_json::json!({
            "removed": store.remove_grant_from_link(args.link.measure, args.link.area, args.link.priority, &args.grant)?
        }),
        LinkCommand::SapCreate(args) => serde_json::json!({
            "created": store.create_species_area_priority_link(args.species, args.area, args.priority)?
        }),
        LinkCommand::SapDelete(args) => serde_json::json!({
            "removed": store.delete_species_area_priority_link(args.species, args.area, args.priority)?
        }),
        LinkCommand::HabitatCreate(args) => serde_json::json!({
            "created": store.create_habitat_link(args.kind, args.habitat, args.area)?
        }),
        LinkCommand::HabitatDelete(args) => serde_json::json!({
            "removed": store.delete_habitat_link(args.kind, args.habitat, args.area)?
        }),
        LinkCommand::FundingAdd(args) => serde_json::json!({
            "id": store.add_funding_scheme(args.area, &args.scheme)?
        }),
    };
    emit_json(result)
}

fn run_snapshot(cli: &Cli, command: &SnapshotCommand) -> Result<()> {
    let manager = backup_manager(cli);
    match command {
        SnapshotCommand::Create(args) => {
            let snapshot_id =
                manager.create_snapshot(&args.description, OperationType::Manual, None, None)?;
            emit_json(serde_json::json!({
                "enabled": manager.is_enabled(),
                "snapshot_id": snapshot_id
            }))
        }
        SnapshotCommand::List(args) => {
            let filter = SnapshotFilter {
                operation_type: args.operation,
                entity_type: args.entity_type,
                limit: args.limit,
            };
            let snapshots = manager.list_snapshots(&filter)?;
            emit_json(serde_json::json!({
                "enabled": manager.is_enabled(),
                "count": snapshots.len(),
                "snapshots": snapshots
            }))
        }
        SnapshotCommand::Restore(args) => {
            let report = manager
                .restore_snapshot(&args.snapshot_id)
                .with_context(|| format!("failed to restore snapshot {}", args.snapshot_id))?;
            emit_json(serde_json::json!({
                "status": "restored",
                "report": report
            }))
        }
        SnapshotCommand::Cleanup(args) => {
            let keep = args.keep.unwrap_or(manager.config().retention);
            let removed = manager.cleanup_old_snapshots(keep)?;
            emit_json(serde_json::json!({
                "enabled": manager.is_enabled(),
                "keep": keep,
                "removed": removed
            }))
        }
        SnapshotCommand::Delete(args) => {
            let record = manager.delete_snapshot(&args.snapshot_id)?;
            emit_json(serde_json::json!({
                "status": "deleted",
                "snapshot": record
            }))
        }
    }
}

fn parse_entity_type(raw: &str) -> std::result::Result<EntityType, String> {
    EntityType::parse(raw).ok_or_else(|| {
        let known = EntityType::ALL.map(EntityType::as_str).join(", ");
        format!("unknown entity type `{raw}` (expected one of: {known})")
    })
}

fn parse_operation_type(raw: &str) -> std::result::Result<OperationType, String> {
    OperationType::parse(raw).ok_or_else(|| format!("unknown operation type `{raw}`"))
}

fn parse_lookup_kind(raw: &str) -> std::result::Result<LookupKind, String> {
    LookupKind::parse(raw)
        .ok_or_else(|| format!("unknown lookup kind `{raw}` (measure_type, stakeholder, benefit)"))
}

fn parse_habitat_kind(raw: &str) -> std::result::Result<HabitatLinkKind, String> {
    HabitatLinkKind::parse(raw).ok_or_else(|| format!("unknown habitat link kind `{raw}`"))
}

fn parse_field(raw: &str) -> std::result::Result<(String, FieldValue), String> {
    let (column, value) =
        raw.split_once('=').ok_or_else(|| format!("expected column=value, got `{raw}`"))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("missing column name in `{raw}`"));
    }
    let value = if value.is_empty() { FieldValue::Null } else { FieldValue::from(value) };
    Ok((column.to_string(), value))
}

fn parse_relationship_set(raw: &str) -> std::result::Result<RelationshipSet, String> {
    let (category, members) =
        raw.split_once('=').ok_or_else(|| format!("expected category=id,id, got `{raw}`"))?;
    let members = members
        .split(',')
        .map(str::trim)
        .filter(|member| !member.is_empty())
        .map(|member| member.parse::<i64>().map_or_else(|_| EntityId::from(member), EntityId::Int))
        .collect();
    Ok(RelationshipSet { category: category.trim().to_string(), members })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_maps_empty_value_to_null() {
        assert_eq!(parse_field("theme=Woodland"), Ok(("theme".to_string(), FieldValue::from("Woodland"))));
        assert_eq!(parse_field("area_link="), Ok(("area_link".to_string(), FieldValue::Null)));
        assert!(parse_field("no-equals").is_err());
        assert!(parse_field("=value").is_err());
    }

    #[test]
    fn parse_relationship_set_allows_clearing() {
        let set = parse_relationship_set("types=1, 2,3");
        assert_eq!(set, Ok(RelationshipSet::new("types", [1_i64, 2, 3])));
        let cleared = parse_relationship_set("benefits=");
        assert_eq!(cleared, Ok(RelationshipSet::new("benefits", Vec::<i64>::new())));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
