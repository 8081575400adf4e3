//! Operation schema maintenance CLI.
//!
//! Provides the `cstform` binary for inspecting and maintaining operation
//! schemas stored in a SQLite database:
//!
//! - `inspect`: operations in dependency order with their bound schemas
//! - `fingerprint`: blake3 fingerprint of one schema
//! - `execute`: build the result schema of a synthesis operation
//! - `restore-order`: reorder one schema by kind and references
//!
//! The database path comes from `--db`, then the `CSTFORM_DB_PATH`
//! environment variable, then `cstform.db`.

use std::process;

use clap::{Parser, Subcommand};

use cstform_core::id::{OperationId, OssId, SchemaId};
use cstform_propagation::{atomic, OssCache, PropagationError, PropagationFacade};
use cstform_storage::{hash_schema, OssStore, SqliteStore};

/// Conceptual schema propagation tools.
#[derive(Parser)]
#[command(name = "cstform", about = "Conceptual schema propagation tools")]
struct Cli {
    /// Path to the database file.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List the operations of an operation schema.
    Inspect {
        /// Operation schema ID.
        #[arg(long)]
        oss: i64,
    },
    /// Print the fingerprint of a schema.
    Fingerprint {
        /// Schema ID.
        #[arg(long)]
        schema: i64,
    },
    /// Build the result schema of a synthesis operation.
    Execute {
        /// Operation schema ID.
        #[arg(long)]
        oss: i64,

        /// Operation ID.
        #[arg(long)]
        operation: i64,
    },
    /// Reorder a schema: kernel first, then by formal references.
    RestoreOrder {
        /// Schema ID.
        #[arg(long)]
        schema: i64,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let db_path = cli.db.unwrap_or_else(|| {
        std::env::var("CSTFORM_DB_PATH").unwrap_or_else(|_| "cstform.db".to_string())
    });
    let mut store = match SqliteStore::new(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            process::exit(3);
        }
    };
    tracing::debug!("opened database {}", db_path);

    let result = match cli.command {
        Commands::Inspect { oss } => render_inspect(&store, OssId(oss)),
        Commands::Fingerprint { schema } => run_fingerprint(&store, SchemaId(schema)),
        Commands::Execute { oss, operation } => {
            run_execute(&mut store, OssId(oss), OperationId(operation))
        }
        Commands::RestoreOrder { schema } => run_restore_order(&mut store, SchemaId(schema)),
    };
    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(exit_code(&e));
        }
    }
}

/// Exit code for a failed command: 2 for contradictions, 3 for database
/// errors, 1 otherwise.
fn exit_code(error: &PropagationError) -> i32 {
    match error {
        PropagationError::Contradiction { .. } => 2,
        PropagationError::Storage(_) => 3,
        _ => 1,
    }
}

/// Renders operations in dependency order, one per line.
fn render_inspect(store: &dyn OssStore, oss: OssId) -> Result<String, PropagationError> {
    let cache = OssCache::load(store, oss, PropagationFacade::default().resolver())?;
    let mut lines = vec![format!(
        "operation schema \"{}\": {} operation(s)",
        cache.oss().alias,
        cache.operations().count()
    )];
    for id in cache.graph().topological_order() {
        let Some(operation) = cache.operation(id) else {
            continue;
        };
        let arguments: Vec<String> = cache
            .arguments_of(id)
            .into_iter()
            .filter_map(|arg| cache.operation(arg).map(|op| op.alias.clone()))
            .collect();
        let mut line = format!("  {} [{}]", operation.alias, operation.operation_type.as_str());
        if !arguments.is_empty() {
            line.push_str(&format!(" <- {}", arguments.join(", ")));
        }
        match operation.result {
            Some(schema) => {
                let alias = store.get_schema(schema)?.alias;
                let count = store.load_constituents(schema)?.len();
                line.push_str(&format!(" -> \"{}\" ({} cst)", alias, count));
            }
            None => line.push_str(" -> not executed"),
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn run_fingerprint(store: &dyn OssStore, schema: SchemaId) -> Result<String, PropagationError> {
    let items = store.load_constituents(schema)?;
    Ok(hash_schema(&items).to_hex().to_string())
}

fn run_execute(
    store: &mut SqliteStore,
    oss: OssId,
    operation: OperationId,
) -> Result<String, PropagationError> {
    let facade = PropagationFacade::default();
    let schema = atomic(store, |store| facade.execute_operation(store, oss, operation))?;
    tracing::info!("operation {} executed into schema {}", operation, schema.id);
    Ok(serde_json::to_string_pretty(&schema)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e)))
}

fn run_restore_order(store: &mut SqliteStore, schema: SchemaId) -> Result<String, PropagationError> {
    let facade = PropagationFacade::default();
    let aliases = atomic(store, |store| {
        let mut view = facade.load_view(&*store, schema)?;
        view.restore_order(store)?;
        Ok(view
            .items()
            .map(|cst| cst.alias.clone())
            .collect::<Vec<String>>())
    })?;
    Ok(aliases.join(" "))
}
