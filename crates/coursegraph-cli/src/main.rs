//! Course graph inspection CLI.
//!
//! Provides the `coursegraph` binary for read-only queries against a course
//! database written by the server: listing courses, stale nodes, the
//! learning sequence, and a change's blast radius.
//!
//! Uses the same `load_graph` path as the server, so a course is checked
//! against every graph invariant before it is queried.

use std::process;

use clap::{Parser, Subcommand};

use coursegraph_core::graph::CourseGraph;
use coursegraph_core::id::NodeId;
use coursegraph_core::impact::{preview_impact, ProposedChange};
use coursegraph_storage::{CourseId, CourseStore, SqliteStore};

/// Course dependency graph tools.
#[derive(Parser)]
#[command(name = "coursegraph", about = "Course dependency graph tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// List stored courses.
    Courses {
        /// Path to the course database file.
        #[arg(short, long)]
        db: String,
    },
    /// List nodes awaiting regeneration or review.
    Stale {
        #[arg(short, long)]
        db: String,
        #[arg(short, long)]
        course: i64,
    },
    /// Preview which nodes a change to NODE would mark stale.
    Impact {
        #[arg(short, long)]
        db: String,
        #[arg(short, long)]
        course: i64,
        #[arg(short, long)]
        node: u32,
        /// Preview removing the node instead of editing it.
        #[arg(long)]
        removal: bool,
    },
    /// Print objectives and content blocks in prerequisite order.
    Sequence {
        #[arg(short, long)]
        db: String,
        #[arg(short, long)]
        course: i64,
    },
}

/// A failed command: message and exit code.
///
/// Exit codes: 1 = query error (e.g. unknown node), 3 = storage error.
#[derive(Debug)]
struct Failure {
    code: i32,
    message: String,
}

impl Failure {
    fn query(message: impl Into<String>) -> Self {
        Failure {
            code: 1,
            message: message.into(),
        }
    }

    fn storage(message: impl Into<String>) -> Self {
        Failure {
            code: 3,
            message: message.into(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize result: {}\"}}", e)
            });
            println!("{}", json);
        }
        Err(failure) => {
            eprintln!("Error: {}", failure.message);
            process::exit(failure.code);
        }
    }
}

fn run(command: Commands) -> Result<serde_json::Value, Failure> {
    match command {
        Commands::Courses { db } => {
            let courses = open(&db)?
                .list_courses()
                .map_err(|e| Failure::storage(format!("failed to list courses: {}", e)))?;
            Ok(serde_json::json!({ "courses": courses }))
        }
        Commands::Stale { db, course } => {
            let graph = load(&db, course)?;
            Ok(serde_json::json!({ "nodes": graph.stale_nodes() }))
        }
        Commands::Impact {
            db,
            course,
            node,
            removal,
        } => {
            let graph = load(&db, course)?;
            let change = if removal {
                ProposedChange::Removal
            } else {
                ProposedChange::ContentEdit
            };
            let report = preview_impact(&graph, NodeId(node), change)
                .map_err(|e| Failure::query(e.to_string()))?;
            serde_json::to_value(report).map_err(|e| Failure::query(e.to_string()))
        }
        Commands::Sequence { db, course } => {
            let graph = load(&db, course)?;
            Ok(serde_json::json!({ "sequence": graph.learning_sequence() }))
        }
    }
}

fn open(db_path: &str) -> Result<SqliteStore, Failure> {
    SqliteStore::new(db_path)
        .map_err(|e| Failure::storage(format!("failed to open database '{}': {}", db_path, e)))
}

fn load(db_path: &str, course: i64) -> Result<CourseGraph, Failure> {
    open(db_path)?
        .load_graph(CourseId(course))
        .map_err(|e| Failure::storage(format!("failed to load course {}: {}", course, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_core::edge::EdgeType;
    use coursegraph_core::node::{Content, NodeKind};
    use coursegraph_core::propagate::{propagate, PropagationJob};

    fn seeded_db() -> (tempfile::TempDir, String, i64, NodeId) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("course.db").to_str().unwrap().to_string();
        let mut store = SqliteStore::new(&path).unwrap();
        let course = store.create_course("biology").unwrap();

        let graph = CourseGraph::new();
        let lo = graph.add_node(NodeKind::LearningObjective, Content::text("cells")).id;
        let cb = graph.add_node(NodeKind::ContentBlock, Content::text("mitosis")).id;
        graph.add_edge(cb, lo, EdgeType::AlignsTo).unwrap();
        graph.mutate_node(lo, 0, Content::text("cells v2")).unwrap();
        propagate(&graph, &PropagationJob::for_change(lo, 1));
        store.save_course(course, &graph.snapshot()).unwrap();
        (dir, path, course.0, lo)
    }

    #[test]
    fn parses_impact_flags() {
        let cli = Cli::try_parse_from([
            "coursegraph", "impact", "--db", "x.db", "--course", "2", "--node", "5", "--removal",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Impact { course: 2, node: 5, removal: true, .. }
        ));
    }

    #[test]
    fn queries_read_the_stored_course() {
        let (_dir, db, course, lo) = seeded_db();

        let courses = run(Commands::Courses { db: db.clone() }).unwrap();
        assert_eq!(courses["courses"][0]["name"], "biology");

        let stale = run(Commands::Stale { db: db.clone(), course }).unwrap();
        assert_eq!(stale["nodes"].as_array().unwrap().len(), 1);

        let impact = run(Commands::Impact {
            db: db.clone(),
            course,
            node: lo.0,
            removal: true,
        })
        .unwrap();
        assert_eq!(impact["transitive_count"], 1);
        assert_eq!(impact["retired_edges"], 1);

        let sequence = run(Commands::Sequence { db, course }).unwrap();
        assert_eq!(sequence["sequence"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn failures_carry_exit_codes() {
        let (_dir, db, course, _) = seeded_db();
        let err = run(Commands::Impact {
            db: db.clone(),
            course,
            node: 99,
            removal: false,
        })
        .unwrap_err();
        assert_eq!(err.code, 1);

        let err = run(Commands::Stale { db, course: course + 10 }).unwrap_err();
        assert_eq!(err.code, 3);
    }
}
