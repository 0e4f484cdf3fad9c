//! # 署名モジュールの取得
//!
//! 実行環境に応じたロード手順で署名モジュールを取得し、結果をプロセス内で共有する。
//!
//! ## 保証
//! - ロード手順は取得ごとに一度だけ実行される。同時に呼び出された全ての`acquire()`は
//!   同じハンドル（`Arc::ptr_eq`）または同じエラーを受け取る。
//! - アクティベーションは一度だけ起動され、以降は同じ結果を待つ。
//! - 取得はキャンセルできない。呼び出し元が待機をやめても取得タスクは完了まで進み、
//!   結果はキャッシュされる。
//! - 失敗はキャッシュされる。`clear_failure()`を明示的に呼んだ場合のみ再試行される。
//!   取得タスクを実行していたランタイムが途中で終了した場合も`Aborted`として記録される。
//! - 取得の開始にはtokioランタイムが必要。ランタイム外から開始した場合は`Runtime`エラーを返す。
//!
//! ## プロファイル別のロード手順
//! - server: 自己初期化ビルドをインポートして返す
//! - browser: webビルドをインポートし、デフォルトアクティベーションを起動する
//! - worker-like: webビルドとバイナリアセットを並行してインポートし、
//!   同期アクティベーション（なければ非同期版）に事前コンパイル済みモジュールを渡す。
//!   事前コンパイル済みモジュールが登録済みの場合はアセットをインポートせずそれを使う。

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sigload_wasm_host::{PrecompiledModule, WasmHost};
use tokio::sync::{watch, OnceCell};

use crate::config::LoaderConfig;
use crate::error::AcquireError;
use crate::profile::{HostCapabilities, RuntimeProfile};
use crate::provider::{ActivationRoute, ModuleHandle, ModuleProvider, PackageProvider};


/// 取得結果。全ての待機者にクローンして配布する。
type Outcome = Result<ModuleHandle, AcquireError>;

/// アクティベーションの状態。
///
/// 最初の`activate`呼び出しのみが実際にアクティベーションを起動する。
#[derive(Default)]
pub struct ActivationState {
    outcome: OnceCell<Outcome>,
    attempts: AtomicUsize,
}

impl ActivationState {
    /// 未起動ならアクティベーションを起動し、その結果を返す。
    pub async fn activate<F, Fut>(&self, activation: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        self.outcome
            .get_or_init(|| async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                activation().await
            })
            .await
            .clone()
    }

    /// アクティベーションが起動された回数（0または1）。
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn succeeded(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(_)))
    }
}

/// 署名モジュールの取得器。
///
/// クローンは同じ取得状態を共有する。
#[derive(Clone)]
pub struct ModuleAcquirer {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn ModuleProvider>,
    capabilities: HostCapabilities,
    /// 進行中または完了した取得。`None`なら未開始。
    acquisition: Mutex<Option<watch::Receiver<Option<Outcome>>>>,
    activation: Mutex<Arc<ActivationState>>,
    /// 外部から登録された事前コンパイル済みモジュール（worker-like用）
    injected: Mutex<Option<PrecompiledModule>>,
}

impl ModuleAcquirer {
    /// 新しいModuleAcquirerを作成する。
    ///
    /// # 引数
    /// - `provider`: ビルドバリアントの提供元
    /// - `capabilities`: 実行環境の機能記述子
    pub fn new(provider: Arc<dyn ModuleProvider>, capabilities: HostCapabilities) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                capabilities,
                acquisition: Mutex::new(None),
                activation: Mutex::new(Arc::new(ActivationState::default())),
                injected: Mutex::new(None),
            }),
        }
    }

    /// 設定からPackageProviderを構築して作成する。
    pub fn from_config(config: &LoaderConfig) -> Result<Self, AcquireError> {
        let host = WasmHost::new(config.limits).map_err(|e| AcquireError::Config(e.to_string()))?;
        let loader = config.build_loader()?;
        let provider = PackageProvider::new(host, loader, config.assets.clone());
        Ok(Self::new(Arc::new(provider), config.capabilities.clone()))
    }

    /// 署名モジュールを取得する。
    ///
    /// 何度呼び出してもロード手順は一度だけ実行され、全ての呼び出しが同じ結果を受け取る。
    /// ロード手順はtokioランタイム上のタスクとして起動されるため、最初の呼び出しは
    /// ランタイム内で行う必要がある。
    pub async fn acquire(&self) -> Result<ModuleHandle, AcquireError> {
        let mut rx = self.acquisition()?;
        let outcome = {
            let guard = rx.wait_for(Option::is_some).await.map_err(|_| {
                AcquireError::Aborted("取得タスクが結果を返さずに終了しました".to_string())
            })?;
            (*guard).clone()
        };
        outcome.unwrap_or_else(|| {
            Err(AcquireError::Aborted(
                "取得結果が設定されていません".to_string(),
            ))
        })
    }

    /// 事前コンパイル済みモジュールを登録する（worker-like用）。
    ///
    /// 取得開始前であれば最後の登録が使われる。取得開始後の登録は警告を出して無視する。
    pub fn register_precompiled(&self, module: PrecompiledModule) {
        // 取得開始の判定と登録を同じロック下で行う
        let acquisition = lock(&self.inner.acquisition);
        if acquisition.is_some() {
            tracing::warn!(
                source = module.source(),
                "取得開始後に事前コンパイル済みモジュールが登録されました。この登録は無視されます"
            );
            return;
        }
        let mut injected = lock(&self.inner.injected);
        if let Some(previous) = injected.as_ref() {
            tracing::debug!(
                previous = previous.source(),
                source = module.source(),
                "事前コンパイル済みモジュールの登録を上書きします"
            );
        }
        *injected = Some(module);
    }

    /// 失敗した取得を破棄し、次の`acquire()`で再試行できるようにする。
    ///
    /// 成功した取得や進行中の取得は破棄しない。破棄した場合は`true`を返す。
    pub fn clear_failure(&self) -> bool {
        let mut acquisition = lock(&self.inner.acquisition);
        let failed = acquisition.as_ref().is_some_and(|rx| {
            let settled = rx.borrow().as_ref().map(Result::is_err);
            match settled {
                Some(failed) => failed,
                // 結果を送らずに送信側が破棄された
                None => rx.has_changed().is_err(),
            }
        });
        if !failed {
            return false;
        }
        *acquisition = None;

        let mut activation = lock(&self.inner.activation);
        if !activation.succeeded() {
            *activation = Arc::new(ActivationState::default());
        }
        tracing::info!("失敗した取得結果を破棄しました");
        true
    }

    /// 取得が開始済みか。
    pub fn is_started(&self) -> bool {
        lock(&self.inner.acquisition).is_some()
    }

    /// 分類されたプロファイル。
    pub fn profile(&self) -> RuntimeProfile {
        RuntimeProfile::classify(&self.inner.capabilities)
    }

    /// 実行環境の機能記述子。
    pub fn capabilities(&self) -> &HostCapabilities {
        &self.inner.capabilities
    }

    /// 現在のアクティベーション状態で起動されたアクティベーションの回数。
    pub fn activation_attempts(&self) -> usize {
        lock(&self.inner.activation).attempts()
    }

    /// モジュールのコンパイルに使うエンジン。
    pub fn host(&self) -> &WasmHost {
        self.inner.provider.host()
    }

    /// 共有取得を返す。未開始ならロード手順のタスクを起動する。
    ///
    /// 存在確認と作成は同じロック下で行い、await を挟まない。
    fn acquisition(&self) -> Result<watch::Receiver<Option<Outcome>>, AcquireError> {
        let mut slot = lock(&self.inner.acquisition);
        if let Some(rx) = slot.as_ref() {
            return Ok(rx.clone());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AcquireError::Runtime(format!("tokioランタイム外から取得を開始できません: {e}"))
        })?;

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());

        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move { inner.load().await });
        let publisher = Publisher(tx);
        runtime.spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(AcquireError::Aborted(e.to_string())),
            };
            publisher.publish(outcome);
        });
        Ok(rx)
    }
}

/// 取得結果の送信側。
///
/// 結果を送らずに破棄された場合（ランタイムの終了でタスクが破棄された場合等）は
/// `Aborted`を送る。
struct Publisher(watch::Sender<Option<Outcome>>);

impl Publisher {
    fn publish(&self, outcome: Outcome) {
        self.0.send_replace(Some(outcome));
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.0.borrow().is_none() {
            tracing::error!("取得タスクが結果を返さずに破棄されました");
            self.publish(Err(AcquireError::Aborted(
                "取得タスクが結果を返さずに破棄されました".to_string(),
            )));
        }
    }
}

impl Inner {
    /// 分類とプロファイル別のロード手順。
    async fn load(&self) -> Outcome {
        let profile = RuntimeProfile::classify(&self.capabilities);
        tracing::info!(%profile, "署名モジュールの取得を開始します");

        let outcome = match profile {
            RuntimeProfile::Server => self.load_server().await,
            RuntimeProfile::Browser => self.load_browser().await,
            RuntimeProfile::WorkerLike => self.load_worker_like().await,
        };

        match &outcome {
            Ok(handle) => tracing::info!(
                %profile,
                source = handle.source(),
                wasm_hash = handle.wasm_hash(),
                "署名モジュールの取得が完了しました"
            ),
            Err(e) => tracing::error!(%profile, error = %e, "署名モジュールの取得に失敗しました"),
        }
        outcome
    }

    async fn load_server(&self) -> Outcome {
        self.provider.import_self_initializing().await
    }

    async fn load_browser(&self) -> Outcome {
        let build = self.provider.import_web_build().await?;
        self.activation_state()
            .activate(move || async move { build.init_default().await })
            .await
    }

    async fn load_worker_like(&self) -> Outcome {
        let injected = lock(&self.injected).clone();
        let (build, module) = match injected {
            Some(module) => {
                tracing::debug!(
                    source = module.source(),
                    "登録済みの事前コンパイル済みモジュールを使用します"
                );
                (self.provider.import_web_build().await?, module)
            }
            None => tokio::try_join!(
                self.provider.import_web_build(),
                self.provider.import_precompiled_asset()
            )?,
        };

        self.activation_state()
            .activate(move || async move {
                match build.entry_points().route() {
                    // 同期版は呼び出し元をブロックするため、ブロッキングプール上で呼ぶ
                    Some(ActivationRoute::Sync) => {
                        tokio::task::spawn_blocking(move || build.init_sync(&module))
                            .await
                            .unwrap_or_else(|e| Err(AcquireError::Aborted(e.to_string())))
                    }
                    Some(ActivationRoute::Async) => build.init_with(module).await,
                    None => Err(AcquireError::Activation(
                        "webビルドがアクティベーションのエントリポイントを公開していません"
                            .to_string(),
                    )),
                }
            })
            .await
    }

    fn activation_state(&self) -> Arc<ActivationState> {
        Arc::clone(&lock(&self.activation))
    }
}

/// ロックを取得する（汚染は無視する）。
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
