//! Vellum CLI - talk to a vellum cluster through the failover engine.

mod commands;
mod observability;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::ConnectionArgs;
use commands::request::SendOptions;
use observability::{TracingConfig, init_tracing};
use vellum_core::HttpMethod;

/// Vellum - command-line client for a multi-node document database.
#[derive(Parser)]
#[command(name = "vellum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the nodes hosting the database
    Topology,

    /// Show cluster membership and the current leader
    ClusterTopology,

    /// GET a route and print the JSON result
    Get {
        /// Route, e.g. "/docs?id=users/1"
        route: String,

        /// Route is relative to the server, not the database
        #[arg(long)]
        server: bool,

        /// Fail instead of printing nothing when the route returns 404
        #[arg(long)]
        required: bool,
    },

    /// Send a request with an optional JSON body
    Send {
        /// Route, e.g. "/docs?id=users/1"
        route: String,

        /// HTTP method
        #[arg(short, long, default_value = "PUT")]
        method: HttpMethod,

        /// JSON body
        #[arg(short, long)]
        body: Option<String>,

        /// Attach a raft request id (cluster-mutating commands)
        #[arg(long)]
        raft: bool,

        /// Route is relative to the server, not the database
        #[arg(long)]
        server: bool,

        /// Version the target must be at (sent as If-Match)
        #[arg(long)]
        if_match: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&TracingConfig::from_verbosity(cli.verbose))?;

    let conn = &cli.connection;
    match cli.command {
        Commands::Topology => commands::topology::database(conn).await,
        Commands::ClusterTopology => commands::topology::cluster(conn).await,
        Commands::Get {
            route,
            server,
            required,
        } => commands::request::get(conn, &route, server, required).await,
        Commands::Send {
            route,
            method,
            body,
            raft,
            server,
            if_match,
        } => {
            commands::request::send(
                conn,
                SendOptions {
                    method,
                    route: &route,
                    body: body.as_deref(),
                    raft,
                    server_scoped: server,
                    expected_version: if_match.as_deref(),
                },
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_client::ReadBalance;

    #[test]
    fn parses_connection_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vellum",
            "get",
            "/docs?id=users/1",
            "-u",
            "http://a:8080",
            "--url",
            "http://b:8080",
            "-d",
            "orders",
            "--read-balance",
            "round-robin",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.connection.urls.len(), 2);
        assert_eq!(cli.connection.database.as_deref(), Some("orders"));
        assert_eq!(cli.connection.read_balance, Some(ReadBalance::RoundRobin));
        assert!(matches!(cli.command, Commands::Get { ref route, .. } if route == "/docs?id=users/1"));
    }

    #[test]
    fn parses_send() {
        let cli = Cli::try_parse_from([
            "vellum",
            "send",
            "--method",
            "post",
            "/admin/databases",
            "--body",
            "{}",
            "--raft",
            "--server",
        ])
        .unwrap();

        match cli.command {
            Commands::Send {
                method,
                raft,
                server,
                body,
                ..
            } => {
                assert_eq!(method, HttpMethod::Post);
                assert!(raft);
                assert!(server);
                assert_eq!(body.as_deref(), Some("{}"));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
