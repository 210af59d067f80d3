use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, Subcommand};
use datafusion::dataframe::DataFrame;
use dotenv::dotenv;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabkit::config::Config;
use tabkit::formats::{DataFormat, get_format};
use tabkit::storage::ByteStream;
use tabkit::streaming::{Window, WindowedRows, concat_plans, encode_batches, write_partitioned};
use tabkit::validation::validate_config;
use tabkit::{BackendResolver, Engine, TableReader, open_reader};

#[derive(Parser, Debug)]
#[command(name = "tab", author, version, about, long_about = None)]
struct Cli {
    /// Read the authority of az:// URLs as the storage account instead of the container
    #[arg(long, global = true, env = "TAB_AZ_URL_AUTHORITY_IS_ACCOUNT")]
    az_url_authority_is_account: bool,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file path (JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rows per batch when streaming
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show rows of a file or directory
    View {
        path: String,
        /// Maximum number of rows; without it output is capped and marked when cut off
        #[arg(long)]
        limit: Option<usize>,
        /// Rows to skip from the start
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        /// Write encoded rows to stdout instead of a table
        #[arg(short = 'o', long)]
        output_format: Option<String>,
    },
    /// Show column names and types
    Schema {
        path: String,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
    },
    /// Show size, row and column counts and format metadata
    Summary {
        path: String,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
    },
    /// Run a SQL query; the data is available as table `t`
    Sql {
        query: String,
        path: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        #[arg(short = 'o', long)]
        output_format: Option<String>,
    },
    /// Convert to another format, optionally split into partition files
    Convert {
        src: String,
        dst: String,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        #[arg(short = 'o', long)]
        output_format: Option<String>,
        /// Write a directory of this many partition files
        #[arg(short = 'n', long)]
        num_partitions: Option<usize>,
    },
    /// Concatenate inputs and write them to stdout
    Cat {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        #[arg(short = 'o', long)]
        output_format: Option<String>,
    },
}

struct App {
    config: Config,
    engine: Engine,
    resolver: BackendResolver,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            engine: Engine::new(&config.processing),
            resolver: BackendResolver::from_config(&config.storage),
            config,
        }
    }

    async fn open(&self, path: &str, input_format: Option<&str>) -> Result<Box<dyn TableReader>> {
        Ok(open_reader(&self.engine, &self.resolver, path, input_format, &self.config.formats).await?)
    }

    fn format(&self, name: &str) -> Result<Arc<dyn DataFormat>> {
        Ok(get_format(name, &self.config.formats)?)
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::View {
                path,
                limit,
                skip,
                input_format,
                output_format,
            } => {
                let plan = self.open(&path, input_format.as_deref()).await?.read().await?;
                self.output(plan, Window::new(skip, limit), output_format.as_deref())
                    .await
            }
            Command::Schema { path, input_format } => {
                let schema = self.open(&path, input_format.as_deref()).await?.schema().await?;
                for column in schema.columns() {
                    println!("{}: {}", column.name, column.type_name());
                }
                Ok(())
            }
            Command::Summary { path, input_format } => {
                let summary = self.open(&path, input_format.as_deref()).await?.summary().await?;
                println!("{summary}");
                Ok(())
            }
            Command::Sql {
                query,
                path,
                limit,
                skip,
                input_format,
                output_format,
            } => {
                let plan = self.open(&path, input_format.as_deref()).await?.read().await?;
                let result = self.engine.sql(plan, &query).await?;
                self.output(result, Window::new(skip, limit), output_format.as_deref())
                    .await
            }
            Command::Convert {
                src,
                dst,
                input_format,
                output_format,
                num_partitions,
            } => {
                self.convert(&src, &dst, input_format.as_deref(), output_format.as_deref(), num_partitions)
                    .await
            }
            Command::Cat {
                paths,
                input_format,
                output_format,
            } => self.cat(&paths, input_format.as_deref(), output_format.as_deref()).await,
        }
    }

    /// Print a table, or stream encoded rows when an output format is given.
    async fn output(&self, plan: DataFrame, window: Window, output_format: Option<&str>) -> Result<()> {
        match output_format {
            Some(name) => write_stdout(self.encoded(plan, window, name).await?).await,
            None => {
                println!("{}", self.table(plan, window).await?);
                Ok(())
            }
        }
    }

    /// Encoded rows of the window. The display cap does not apply.
    async fn encoded(&self, plan: DataFrame, window: Window, format: &str) -> Result<ByteStream> {
        Ok(self.format(format)?.write(window.apply(plan)?).await?)
    }

    async fn table(&self, plan: DataFrame, window: Window) -> Result<String> {
        let rows = window.collect(plan, self.config.output.default_limit).await?;
        render_table(&rows)
    }

    async fn convert(
        &self,
        src: &str,
        dst: &str,
        input_format: Option<&str>,
        output_format: Option<&str>,
        num_partitions: Option<usize>,
    ) -> Result<()> {
        let reader = self.open(src, input_format).await?;
        let format = match output_format.or(input_format) {
            Some(name) => self.format(name)?,
            None => reader.format().clone(),
        };
        let plan = reader.read().await?;
        let backend = self.resolver.resolve(dst).await?;

        match num_partitions {
            None => {
                let progress = ProgressBar::new_spinner().with_message("Writing...");
                progress.enable_steady_tick(Duration::from_millis(100));
                let path = self.engine.attach(backend.as_ref(), dst).await?;
                format.write_single(self.engine.context(), plan, &path).await?;
                progress.finish_and_clear();
                info!(src, dst, format = format.name(), "converted");
            }
            Some(partitions) => {
                let progress = ProgressBar::new(partitions as u64)
                    .with_style(ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")?)
                    .with_message("Writing partitions...");
                let written = write_partitioned(
                    &self.engine,
                    backend.as_ref(),
                    format.as_ref(),
                    plan,
                    dst,
                    partitions,
                    &progress,
                )
                .await?;
                info!(src, dst, format = format.name(), files = written.len(), "converted");
            }
        }
        Ok(())
    }

    /// Every input is read with the first input's format.
    async fn cat(&self, paths: &[String], input_format: Option<&str>, output_format: Option<&str>) -> Result<()> {
        let Some((first_path, rest)) = paths.split_first() else {
            return Ok(());
        };
        let first = self.open(first_path, input_format).await?;
        let input = first.format().clone();

        let mut inputs = vec![(first_path.clone(), first.read().await?)];
        for path in rest {
            let reader = self.open(path, Some(input.name())).await?;
            inputs.push((path.clone(), reader.read().await?));
        }

        let format = match output_format {
            Some(name) => self.format(name)?,
            None => input,
        };
        let (schema, batches) = concat_plans(inputs)?;
        write_stdout(encode_batches(batches, format.encoder(schema)?)).await
    }
}

async fn write_stdout(mut bytes: ByteStream) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = bytes.next().await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// Pretty table of the window, with a trailing `...` row when it was cut off.
fn render_table(rows: &WindowedRows) -> Result<String> {
    let batches = if rows.truncated && !rows.schema.fields().is_empty() {
        vec![with_ellipsis_row(rows)?]
    } else if rows.batches.is_empty() {
        vec![RecordBatch::new_empty(rows.schema.clone())]
    } else {
        rows.batches.clone()
    };
    Ok(pretty_format_batches(&batches)?.to_string())
}

fn with_ellipsis_row(rows: &WindowedRows) -> Result<RecordBatch> {
    let options = FormatOptions::default();
    let fields: Vec<Field> = rows
        .schema
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), DataType::Utf8, true))
        .collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for index in 0..fields.len() {
        let mut values = Vec::with_capacity(rows.num_rows() + 1);
        for batch in &rows.batches {
            let formatter = ArrayFormatter::try_new(batch.column(index).as_ref(), &options)?;
            values.extend((0..batch.num_rows()).map(|row| formatter.value(row).to_string()));
        }
        values.push("...".to_string());
        columns.push(Arc::new(StringArray::from(values)));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    // Update config with command line arguments
    if cli.az_url_authority_is_account {
        config.storage.azure.url_authority_is_account = true;
    }
    if let Some(batch_size) = cli.batch_size {
        config.processing.batch_size = batch_size;
    }

    validate_config(&config)?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = load_config(&cli)?;

    App::new(config).run(cli.command).await
}
