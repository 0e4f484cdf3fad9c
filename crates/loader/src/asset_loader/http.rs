//! # HTTP アセットローダー
//!
//! URL経由でWASMアセットを取得する。
//! 本番環境用（CDN等の静的配信）。

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::AssetLoader;
use super::WasmBinary;

/// リクエストタイムアウトのデフォルト値
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// URL経由でアセットを取得するローダー。
///
/// URL形式: `{base_url}/{asset_name}`
///
/// ステータス200以外のレスポンスと空のレスポンスはエラーとする。
pub struct HttpLoader {
    client: reqwest::Client,
    /// アセットのベースURL
    base_url: String,
}

impl HttpLoader {
    /// 新しいHttpLoaderを作成する。
    ///
    /// # 引数
    /// - `base_url`: アセットのベースURL（例: "https://cdn.example.com/sign/pkg"）
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| format!("HTTPクライアントの構築に失敗: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl AssetLoader for HttpLoader {
    fn load<'a>(
        &'a self,
        asset_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<WasmBinary, String>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/{asset_name}", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("WASM取得に失敗 ({url}): {e}"))?;
            let status = response.status();
            // 206等の部分レスポンスは受け付けない
            if status != reqwest::StatusCode::OK {
                return Err(format!(
                    "WASM取得でHTTPエラー: ステータス {} ({url})",
                    status.as_u16()
                ));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| format!("WASMレスポンスの読み込みに失敗 ({url}): {e}"))?;
            if body.is_empty() {
                return Err(format!("WASM取得: 空のレスポンス ({url})"));
            }
            Ok(WasmBinary {
                source: url,
                bytes: body.to_vec(),
            })
        })
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}
