//! Contract field extraction through an external language model.
//!
//! The extracted contract text is substituted into a fixed six-point
//! prompt ([`PROMPT_TEMPLATE`]) and sent to the model once. The reply is
//! kept as free text; [`crate::suspicion`] looks for risk signals in it.
//!
//! Credentials are loaded once at startup with [`load_api_key`] and handed
//! to the client at construction.
//!
//! ```rust
//! use contract_review::analysis::build_prompt;
//!
//! let prompt = build_prompt("甲方：A公司");
//! assert!(prompt.contains("甲方：A公司"));
//! assert!(prompt.contains("5. 是否有预开发票风险："));
//! ```

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;

/// Placeholder replaced by the document text.
const TEXT_PLACEHOLDER: &str = "{text}";

/// The analysis prompt. The six numbered fields and the three judgement
/// rules at the end are what the suspicion rules key on; keep them stable.
pub const PROMPT_TEMPLATE: &str = r#"
请从以下文件中分析以下信息，并输出分析结果的纯文本，只需输出分析结果，且不需要格式化。

1. 需方：
2. 合同款项总额（不含税）、税额（税率13%）、合同款项总额（含税）：
3. 付款方式：
4. 需方账户：
5. 是否有预开发票风险：
6. 是开口还是闭口合同：

文件内容如下：
"""
{text}
"""

关于合同款项总额（含不含税）的判断：如果合同中只写明金额的合计数，则视该合计数为合同款项总额（含税）。
关于是否有预开发票风险的判断：预开发票是指开票时间早于发货时间，若合同中写明开票时间早于发货时间，则判断为有预开发票风险；相反地，若开票时间晚于发货时间，则没有预开发票风险。如果合同中未明确提及两者的时间点，则返回“未明确提及”，并尽量说明相关信息，包括产品所有权转移时间。例如：“在乙方全额收到款项之前，产品的所有权归乙方所有。乙方收到全部款项后，产品的所有权归甲方所有。”该例中明确说明所有权转移时间在付款之后，因此没有预开发票风险。
关于是开口还是闭口合同的判断：若合同中明确说明款项回收的时间，则为闭口合同；若未说明款项回收的时间，则为开口合同。
"#;

/// Fill the template with `text`.
pub fn build_prompt(text: &str) -> String {
    PROMPT_TEMPLATE.replacen(TEXT_PLACEHOLDER, text, 1)
}

/// Secret for the model service. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Read the API key from a credential file (surrounding whitespace ignored).
pub fn load_api_key(path: &Path) -> Result<ApiKey, AnalysisError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| AnalysisError::MissingCredential(path.to_path_buf()))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(AnalysisError::EmptyCredential(path.to_path_buf()));
    }
    Ok(ApiKey::new(key))
}

/// Sends contract text to a model and returns its free-text analysis.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-1.5-pro-latest"`).
    fn model_name(&self) -> &str;

    /// One model call for one document. No retries.
    async fn analyze(&self, text: &str) -> Result<String, AnalysisError>;
}

// ============ Gemini ============

/// Google Gemini `generateContent` over REST.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: ApiKey,
}

impl GeminiClient {
    pub fn new(config: &AnalysisConfig, api_key: ApiKey) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl FieldExtractor for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, text: &str) -> Result<String, AnalysisError> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [{ "text": build_prompt(text) }]
            }]
        });

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String, AnalysisError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("missing candidates");
            AnalysisError::EmptyResponse(reason.to_string())
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse("candidate has no text".to_string()));
    }
    Ok(text)
}

/// Build the client named by `analysis.provider`.
pub fn create_client(
    config: &AnalysisConfig,
    api_key: ApiKey,
) -> Result<Box<dyn FieldExtractor>, AnalysisError> {
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiClient::new(config, api_key)?)),
        other => Err(AnalysisError::UnknownProvider(other.to_string())),
    }
}
