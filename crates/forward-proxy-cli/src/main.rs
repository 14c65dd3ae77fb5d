//! Forward Producer Proxy CLI
//!
//! Operator tool for the forward producer: encodes and decodes transaction
//! id tokens and issues single heartbeat, send, and end-transaction
//! requests against a broker through the pooled producer.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forward_proxy_core::config::{LoggingConfig, ProxyConfig};
use forward_proxy_core::metrics::ForwardMetrics;
use forward_proxy_core::protocol::{
    sysflag, EndTransactionRequestHeader, HeartbeatData, Message, ProducerData,
    SendMessageRequestHeader,
};
use forward_proxy_core::{ForwardProducer, TransactionId};

/// Forward producer proxy tool.
#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print producer metrics in Prometheus text format after the command.
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a transaction id token from its fields.
    EncodeTxid {
        /// Broker address (host:port).
        #[arg(long)]
        broker_addr: String,
        #[arg(long)]
        tran_state_table_offset: u64,
        #[arg(long)]
        commit_log_offset: u64,
        /// Transaction id assigned by the broker.
        #[arg(long, default_value = "")]
        broker_txid: String,
    },

    /// Decode a transaction id token.
    DecodeTxid {
        token: String,
    },

    /// Send a heartbeat for a producer group.
    Heartbeat {
        /// Broker address (host:port).
        #[arg(long)]
        broker: String,
        #[arg(long)]
        producer_group: String,
        #[arg(long, default_value = "forward-proxy-cli")]
        client_id: String,
        #[arg(long, default_value_t = 3_000)]
        timeout_ms: u64,
    },

    /// Send one message and print the send result.
    Send {
        /// Broker address (host:port).
        #[arg(long)]
        broker: String,
        #[arg(long, default_value = "")]
        broker_name: String,
        #[arg(long)]
        producer_group: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value_t = 0)]
        queue_id: i32,
        /// Message body.
        #[arg(long, default_value = "")]
        body: String,
        /// Send as the prepare phase of a transaction.
        #[arg(long)]
        prepared: bool,
        #[arg(long, default_value_t = 3_000)]
        timeout_ms: u64,
    },

    /// Commit or roll back a prepared message by its token.
    EndTransaction {
        /// Token returned by a prepared send.
        #[arg(long)]
        token: String,
        #[arg(long)]
        producer_group: String,
        #[arg(long)]
        msg_id: String,
        #[arg(long, value_enum)]
        action: TransactionAction,
        /// Mark the request as answering a broker transaction check.
        #[arg(long)]
        from_check: bool,
        #[arg(long, default_value_t = 3_000)]
        timeout_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransactionAction {
    Commit,
    Rollback,
}

impl TransactionAction {
    fn flag(self) -> i32 {
        match self {
            Self::Commit => sysflag::TRANSACTION_COMMIT_TYPE,
            Self::Rollback => sysflag::TRANSACTION_ROLLBACK_TYPE,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => ProxyConfig::default(),
    };

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    setup_tracing(&log_config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run(args, config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(args: Args, config: ProxyConfig) -> anyhow::Result<()> {
    let command = match args.command {
        Command::EncodeTxid {
            broker_addr,
            tran_state_table_offset,
            commit_log_offset,
            broker_txid,
        } => {
            let id = TransactionId::new(
                broker_addr,
                tran_state_table_offset,
                commit_log_offset,
                broker_txid,
            )?;
            println!("{}", id.encode());
            return Ok(());
        }
        Command::DecodeTxid { token } => {
            let id = TransactionId::decode(&token)?;
            println!("broker_addr: {}", id.broker_addr());
            println!("tran_state_table_offset: {}", id.tran_state_table_offset());
            println!("commit_log_offset: {}", id.commit_log_offset());
            println!("broker_transaction_id: {}", id.broker_transaction_id());
            return Ok(());
        }
        command => command,
    };

    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(ForwardMetrics::new()));
    let producer = ForwardProducer::new(&config, metrics.clone())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        producer_num = config.forward.producer_num,
        worker_threads = config.forward.worker_threads_for_host(),
        "forward producer ready"
    );

    let outcome = execute(&producer, command).await;
    producer.shutdown().await;

    if args.print_metrics {
        match &metrics {
            Some(metrics) => print!("{}", metrics.encode()?),
            None => warn!("metrics are disabled in the configuration"),
        }
    }

    outcome
}

async fn execute(producer: &ForwardProducer, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Heartbeat {
            broker,
            producer_group,
            client_id,
            timeout_ms,
        } => {
            let heartbeat = HeartbeatData {
                client_id,
                producer_data_set: vec![ProducerData {
                    group_name: producer_group,
                }],
                consumer_data_set: Vec::new(),
            };
            let code = producer.heartbeat(&broker, &heartbeat, timeout_ms).await?;
            println!("response code: {code}");
        }
        Command::Send {
            broker,
            broker_name,
            producer_group,
            topic,
            queue_id,
            body,
            prepared,
            timeout_ms,
        } => {
            let sys_flag = if prepared {
                sysflag::TRANSACTION_PREPARED_TYPE
            } else {
                sysflag::TRANSACTION_NOT_TYPE
            };
            let message = Message::new(topic.clone(), body);
            let header = SendMessageRequestHeader {
                producer_group,
                topic,
                queue_id,
                sys_flag,
                ..Default::default()
            };
            let result = producer
                .send_message(&broker, &broker_name, &message, &header, timeout_ms)
                .await?;
            println!("send status: {:?}", result.send_status);
            println!("offset msg id: {}", result.offset_msg_id);
            println!("queue: {} offset {}", result.message_queue.queue_id, result.queue_offset);
            if let Some(transaction_id) = result.transaction_id {
                println!("transaction id: {transaction_id}");
            }
        }
        Command::EndTransaction {
            token,
            producer_group,
            msg_id,
            action,
            from_check,
            timeout_ms,
        } => {
            let header = EndTransactionRequestHeader {
                producer_group,
                commit_or_rollback: action.flag(),
                from_transaction_check: from_check,
                msg_id,
                transaction_id: Some(token),
                ..Default::default()
            };
            producer.end_transaction(&header, timeout_ms).await?;
            println!("end transaction sent");
        }
        // Token commands run without a producer.
        Command::EncodeTxid { .. } | Command::DecodeTxid { .. } => {}
    }

    Ok(())
}
