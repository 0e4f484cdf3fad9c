//! # Sigload CLI
//!
//! 実行プロファイルの確認と、署名モジュールの取得・呼び出しを行う。
//!
//! ## コマンド
//! - `sigload probe`: ホスト機能と分類されたプロファイルをJSONで出力
//! - `sigload acquire`: 複数の同時呼び出しで取得し、モジュール情報を出力
//! - `sigload invoke <EXPORT> [ARGS...]`: 取得後、i32引数でエクスポート関数を呼び出す
//!
//! 設定は環境変数（`SIGLOAD_*`）から読み込み、コマンドラインオプションで上書きする。

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use sigload::{
    AssetSource, EntryPoints, HostCapabilities, LoaderConfig, ModuleAcquirer, RuntimeProfile,
};

#[derive(Parser)]
#[command(name = "sigload", about = "署名モジュールの取得ツール")]
struct Cli {
    /// アセットのディレクトリ（SIGLOAD_WASM_DIR を上書き）
    #[arg(long, global = true)]
    wasm_dir: Option<PathBuf>,

    /// アセットのベースURL（SIGLOAD_WASM_BASE_URL を上書き）
    #[arg(long, global = true, conflicts_with = "wasm_dir")]
    base_url: Option<String>,

    /// ホスト機能（例: "webassembly,fetch"。SIGLOAD_HOST_CAPS を上書き）
    #[arg(long, global = true)]
    host_caps: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// ホスト機能と実行プロファイルを表示する
    Probe,
    /// 署名モジュールを取得する
    Acquire {
        /// 同時に取得を要求する呼び出し元の数
        #[arg(long, default_value_t = 1)]
        callers: usize,
        /// 取得前に登録する事前コンパイル対象のWASMファイル（worker-like用）
        #[arg(long)]
        precompiled: Option<PathBuf>,
    },
    /// 署名モジュールのエクスポート関数を呼び出す
    Invoke {
        /// エクスポート関数名
        export: String,
        /// i32引数
        #[arg(allow_negative_numbers = true)]
        args: Vec<i32>,
    },
}

/// `probe` の出力。
#[derive(Serialize)]
struct ProbeReport<'a> {
    capabilities: &'a HostCapabilities,
    matched: Option<RuntimeProfile>,
    profile: RuntimeProfile,
    source: String,
    entry_points: EntryPoints,
}

/// `acquire` の出力。
#[derive(Serialize)]
struct AcquireReport<'a> {
    profile: RuntimeProfile,
    callers: usize,
    source: &'a str,
    wasm_hash: &'a str,
    exports: Vec<&'a str>,
    activation_attempts: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Probe => {
            let report = ProbeReport {
                capabilities: &config.capabilities,
                matched: RuntimeProfile::detect(&config.capabilities),
                profile: RuntimeProfile::classify(&config.capabilities),
                source: describe_source(&config.source),
                entry_points: config.assets.entry_points,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Acquire {
            callers,
            precompiled,
        } => {
            let acquirer = ModuleAcquirer::from_config(&config)?;
            if let Some(path) = precompiled {
                register_file(&acquirer, &path).await?;
            }

            let callers = callers.max(1);
            let mut tasks = Vec::with_capacity(callers);
            for _ in 0..callers {
                let acquirer = acquirer.clone();
                tasks.push(tokio::spawn(async move { acquirer.acquire().await }));
            }
            let mut handles = Vec::with_capacity(callers);
            for task in tasks {
                handles.push(task.await.context("取得タスクが異常終了しました")??);
            }

            let module = &handles[0];
            let report = AcquireReport {
                profile: acquirer.profile(),
                callers,
                source: module.source(),
                wasm_hash: module.wasm_hash(),
                exports: module.export_names(),
                activation_attempts: acquirer.activation_attempts(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Invoke { export, args } => {
            let acquirer = ModuleAcquirer::from_config(&config)?;
            let module = acquirer.acquire().await?;
            let results = module.invoke_i32(&export, &args)?;
            tracing::info!(%export, ?args, ?results, "エクスポート関数を呼び出しました");
            println!("{}", serde_json::to_string(&results)?);
        }
    }

    Ok(())
}

/// 環境変数の設定をコマンドラインオプションで上書きする。
fn load_config(cli: &Cli) -> anyhow::Result<LoaderConfig> {
    let mut config = LoaderConfig::from_env().context("環境変数の設定が不正です")?;
    if let Some(dir) = &cli.wasm_dir {
        config.source = AssetSource::Dir(dir.clone());
    }
    if let Some(url) = &cli.base_url {
        config.source = AssetSource::Url(url.clone());
    }
    if let Some(caps) = &cli.host_caps {
        config.capabilities = caps.parse().context("--host-caps の値が不正です")?;
    }
    Ok(config)
}

/// WASMファイルを読み込み、取得器のエンジンでコンパイルして登録する。
async fn register_file(acquirer: &ModuleAcquirer, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("WASMファイルの読み込みに失敗: {}", path.display()))?;
    let source = format!("file://{}", path.display());
    let module = acquirer.host().compile(&bytes, source)?;
    if acquirer.profile() != RuntimeProfile::WorkerLike {
        tracing::warn!(
            profile = %acquirer.profile(),
            "事前コンパイル済みモジュールはworker-likeプロファイルでのみ使用されます"
        );
    }
    acquirer.register_precompiled(module);
    Ok(())
}

fn describe_source(source: &AssetSource) -> String {
    match source {
        AssetSource::Dir(dir) => format!("file://{}", dir.display()),
        AssetSource::Url(url) => url.clone(),
    }
}
