//! CLI mínima sobre `LensService` contra Postgres.
//!
//! Uso: `inferlens <comando> [--flag valor]...`; la salida es JSON. La
//! configuración del gateway se lee de `INFERLENS_CONFIG_PATH` y la conexión
//! de `DATABASE_URL` (ambas aceptan `.env`).
use std::collections::HashMap;
use std::str::FromStr;

use inferlens::errors::CliError;
use inferlens::{DatasetQueryParams, FunctionKind, LensService, MaterializeParams, PageRequest, QueryStore, RecordFilter};
use lens_core::dataset::{MetricFilter, OutputSource};
use lens_core::query::Comparator;
use lens_core::{ConfigLoader, FileConfigLoader};
use lens_persistence::{build_dev_pool_from_env, PgStore, PoolProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

const USAGE: &str = "\
inferlens page        [--episodes] [--function F] [--variant V] [--episode ID] [--before ID | --after ID] [--size N]
inferlens bounds      [--episodes] [--function F] [--variant V] [--episode ID]
inferlens adjacent    --id ID [--episodes] [--function F] [--variant V] [--episode ID]
inferlens count       --kind chat|structured [--function F] [--variant V] [--output inference|demonstration|none]
                      [--metric NAME --op OP --threshold X] [--limit N] [--offset N]
inferlens materialize --dataset D --kind chat|structured [selección como en count]
inferlens get         --dataset D --id ID [--allow-stale]
inferlens stale       --dataset D --id ID --kind chat|structured
inferlens datasets";

const SWITCHES: [&str; 2] = ["--episodes", "--allow-stale"];

struct Args {
    command: String,
    flags: HashMap<String, String>,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self, CliError> {
        let command = raw.first().cloned().ok_or_else(|| CliError::Usage(USAGE.into()))?;
        let mut flags = HashMap::new();
        let mut i = 1;
        while i < raw.len() {
            let key = raw[i].as_str();
            if !key.starts_with("--") {
                return Err(CliError::Usage(format!("unexpected argument {key}")));
            }
            if SWITCHES.contains(&key) {
                flags.insert(key.to_string(), "true".to_string());
            } else {
                i += 1;
                let value = raw.get(i).ok_or_else(|| CliError::Usage(format!("{key} needs a value")))?;
                flags.insert(key.to_string(), value.clone());
            }
            i += 1;
        }
        Ok(Self { command, flags })
    }

    fn opt(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str, CliError> {
        self.opt(key).ok_or_else(|| CliError::Usage(format!("{key} is required")))
    }

    fn switch(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, CliError> {
        self.opt(key)
            .map(|v| v.parse::<T>().map_err(|_| CliError::Usage(format!("invalid value for {key}: {v}"))))
            .transpose()
    }

    fn uuid(&self, key: &str) -> Result<Option<Uuid>, CliError> {
        self.parsed::<Uuid>(key)
    }

    /// Enumeraciones en snake_case, con los mismos nombres que su forma JSON.
    fn enumerated<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CliError> {
        self.opt(key)
            .map(|v| {
                serde_json::from_value(serde_json::Value::String(v.to_string()))
                    .map_err(|_| CliError::Usage(format!("invalid value for {key}: {v}")))
            })
            .transpose()
    }

    fn filter(&self) -> Result<RecordFilter, CliError> {
        Ok(RecordFilter { function_name: self.opt("--function").map(str::to_string),
                          variant_name: self.opt("--variant").map(str::to_string),
                          episode_id: self.uuid("--episode")? })
    }

    fn page_request(&self) -> Result<PageRequest, CliError> {
        let mut request = PageRequest::new(self.parsed("--size")?.unwrap_or(20));
        request.before = self.uuid("--before")?;
        request.after = self.uuid("--after")?;
        Ok(request)
    }

    fn kind(&self) -> Result<FunctionKind, CliError> {
        self.enumerated("--kind")?.ok_or_else(|| CliError::Usage("--kind is required".into()))
    }

    fn selection(&self) -> Result<DatasetQueryParams, CliError> {
        let mut params = DatasetQueryParams::new(self.kind()?);
        params.function_name = self.opt("--function").map(str::to_string);
        params.variant_name = self.opt("--variant").map(str::to_string);
        params.output_source = self.enumerated::<OutputSource>("--output")?.unwrap_or_default();
        params.limit = self.parsed("--limit")?;
        params.offset = self.parsed("--offset")?;
        if let Some(metric_name) = self.opt("--metric") {
            let comparator = self.parsed::<Comparator>("--op")?.unwrap_or(Comparator::Eq);
            let threshold = self.parsed::<f64>("--threshold")?
                                .ok_or_else(|| CliError::Usage("--metric needs --threshold".into()))?;
            params.metric_filter = Some(MetricFilter { metric_name: metric_name.to_string(),
                                                       comparator,
                                                       threshold });
        }
        Ok(params)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run<S, L>(service: &LensService<S, L>, args: &Args) -> Result<(), CliError>
    where S: QueryStore,
          L: ConfigLoader
{
    let episodes = args.switch("--episodes");
    match args.command.as_str() {
        "page" if episodes => print_json(&service.query_episode_page(&args.filter()?, &args.page_request()?).await?),
        "page" => print_json(&service.query_inference_page(&args.filter()?, &args.page_request()?).await?),
        "bounds" if episodes => print_json(&service.query_episode_bounds(&args.filter()?).await?),
        "bounds" => print_json(&service.query_inference_bounds(&args.filter()?).await?),
        "adjacent" => {
            let current = args.uuid("--id")?.ok_or_else(|| CliError::Usage("--id is required".into()))?;
            let filter = args.filter()?;
            if episodes {
                print_json(&service.get_adjacent_episode_ids(current, &filter).await?)
            } else {
                print_json(&service.get_adjacent_inference_ids(current, &filter).await?)
            }
        }
        "count" => print_json(&service.count_rows(&args.selection()?).await?),
        "materialize" => {
            let params = MaterializeParams { dataset_name: args.required("--dataset")?.to_string(),
                                             selection: args.selection()? };
            let written = service.materialize(&params).await?;
            print_json(&serde_json::json!({ "dataset_name": params.dataset_name, "written": written }))
        }
        "get" => {
            let id = args.uuid("--id")?.ok_or_else(|| CliError::Usage("--id is required".into()))?;
            let dataset = args.required("--dataset")?;
            match service.get_datapoint(dataset, id, args.switch("--allow-stale")).await? {
                Some(datapoint) => print_json(&datapoint),
                None => Err(CliError::Lens(inferlens::LensError::DatapointNotFound { dataset: dataset.to_string(),
                                                                                      id })),
            }
        }
        "stale" => {
            let id = args.uuid("--id")?.ok_or_else(|| CliError::Usage("--id is required".into()))?;
            let written = service.stale_datapoint(args.required("--dataset")?, id, args.kind()?).await?;
            print_json(&serde_json::json!({ "id": id, "written": written }))
        }
        "datasets" => print_json(&service.list_datasets().await?),
        other => Err(CliError::Usage(format!("unknown command {other}\n{USAGE}"))),
    }
}

async fn connect() -> Result<LensService<PgStore<PoolProvider>, FileConfigLoader>, CliError> {
    let pool = build_dev_pool_from_env()?;
    let loader = FileConfigLoader::from_env()?;
    let service = LensService::new(PgStore::new(PoolProvider { pool }), loader);
    service.init().await?;
    Ok(service)
}

#[tokio::main]
async fn main() {
    // .env opcional con DATABASE_URL e INFERLENS_CONFIG_PATH
    let _ = dotenvy::dotenv();
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let outcome = match Args::parse(&raw) {
        Ok(args) => match connect().await {
            Ok(service) => run(&service, &args).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        eprintln!("[inferlens] {e}");
        std::process::exit(e.exit_code());
    }
}
