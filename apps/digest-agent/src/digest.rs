use std::str::FromStr;

use async_trait::async_trait;
use gemini_engine::{GeminiClient, GeminiError};
use thiserror::Error;
use tracing::{debug, info, instrument};

const GENERAL_TEMPLATE: &str = "あなたは優秀なニュース編集者です。
以下のNHKニュースリストから、特に社会的影響が大きい、または重要度の高いニュースを「最大3つ」選んでください。
それぞれを簡潔に要約し、以下のフォーマットで出力してください。
冒頭の挨拶などは不要です。

【出力フォーマット】
📰 [タイトル]
[要約を2行〜3行で]
🔗 [リンク]

---
ニュースリスト:
{news}
";

const STRICT_TEMPLATE: &str = "あなたは厳格なニュース編集者です。
以下のNHKニュースリストから、次の条件をすべて満たすニュースだけを「最大3つ」選んでください。

【選定ルール】
1. 日本国内の出来事であること（海外のみの出来事は除外）
2. 政治・経済・社会・災害・生活に直接関わる内容であること
3. スポーツ、芸能、天気予報、事件の続報のみの記事は除外すること
4. 同じ出来事を扱う記事が複数ある場合は1つにまとめること
5. 条件を満たすニュースが1つもない場合は、無理に選ばず「該当なし」とだけ出力すること

それぞれを簡潔に要約し、以下のフォーマットで出力してください。
冒頭の挨拶や選定理由の説明は不要です。

【出力フォーマット】
📰 [タイトル]
[要約を2行〜3行で]
🔗 [リンク]

---
ニュースリスト:
{news}
";

/// Built-in instruction sets for picking stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorialPolicy {
    /// Up to three of the most important stories
    General,
    /// Domestic hard news only, may select nothing
    Strict,
}

impl FromStr for EditorialPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(EditorialPolicy::General),
            "strict" => Ok(EditorialPolicy::Strict),
            other => Err(format!("unknown policy '{}', expected general or strict", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub const PLACEHOLDER: &'static str = "{news}";

    pub fn for_policy(policy: EditorialPolicy) -> Self {
        match policy {
            EditorialPolicy::General => PromptTemplate(GENERAL_TEMPLATE.to_string()),
            EditorialPolicy::Strict => PromptTemplate(STRICT_TEMPLATE.to_string()),
        }
    }

    /// `None` when the text has nowhere to put the news list.
    pub fn custom(text: String) -> Option<Self> {
        text.contains(Self::PLACEHOLDER).then_some(PromptTemplate(text))
    }

    pub fn render(&self, news_text: &str) -> String {
        self.0.replace(Self::PLACEHOLDER, news_text)
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Model(#[from] GeminiError),

    #[error("model returned an empty digest")]
    Empty,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, news_text: &str) -> Result<String, DigestError>;
}

pub struct GeminiSummarizer {
    client: GeminiClient,
    template: PromptTemplate,
}

impl GeminiSummarizer {
    pub fn new(client: GeminiClient, template: PromptTemplate) -> Self {
        GeminiSummarizer { client, template }
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    #[instrument(skip(self, news_text), fields(news_len = news_text.len()))]
    async fn summarize(&self, news_text: &str) -> Result<String, DigestError> {
        let prompt = self.template.render(news_text);
        let digest = self.client.generate(&prompt).await?;

        if digest.trim().is_empty() {
            return Err(DigestError::Empty);
        }

        info!(model = %self.client.model(), "Digest generated");
        debug!(digest_length = digest.len(), "Digest details");

        Ok(digest)
    }
}
