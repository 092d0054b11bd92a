//! Prompt templates and `{placeholder}` rendering.

/// Topic placeholder value when the caller supplied none.
pub const UNSPECIFIED_TOPIC: &str = "未提供";

pub const OUTLINE_TEMPLATE: &str = r#"你是一位小红书爆款图文策划。请围绕主题「{topic}」策划一组图文笔记的页面大纲。

要求：
- 总页数 4 到 8 页，第一页为封面，最后一页为总结。
- 每一页以 <page> 开头，紧接着用 [封面]、[内容] 或 [总结] 标明页面类型。
- 每页写清楚该页画面上要呈现的标题、要点和视觉元素。
- 只输出大纲本身，不要输出任何解释。

示例：
<page>
[封面]
标题：……
<page>
[内容]
要点：……
"#;

pub const OUTLINE_IMAGES_NOTE: &str =
    "\n\n注意：用户提供了参考图片，请结合图片中的产品、风格和细节来策划内容。";

pub const CONTENT_TEMPLATE: &str = r#"你是一位小红书文案专家。根据以下主题和页面大纲，为这篇图文笔记撰写发布文案。

主题：{topic}

大纲：
{outline}

请严格输出如下 JSON，不要输出其他文字：
```json
{
  "titles": ["标题1（20字以内，带emoji）", "标题2", "标题3"],
  "copywriting": "正文文案，300到600字，分段，口语化",
  "tags": ["标签1", "标签2", "标签3", "标签4", "标签5"]
}
```
"#;

pub const PAGE_IMAGE_TEMPLATE: &str = r#"请生成一张小红书风格的竖版图文页面图片（3:4）。

页面类型：{page_type}

本页内容：
{page_content}

用户原始主题：{user_topic}

完整大纲（用于保持整组图片风格和信息一致）：
{full_outline}

要求：
- 画面中的中文文字清晰、准确、无错别字。
- 排版精致，留白合理，配色统一。
- 封面要有强视觉冲击力，内容页信息层次清晰，总结页要有收束感。
- 如果提供了参考图片，保持与参考图片一致的整体风格、配色和字体。
"#;

pub const PAGE_IMAGE_SHORT_TEMPLATE: &str = r#"小红书风格竖版图文页（3:4），页面类型：{page_type}。
内容：
{page_content}
文字清晰无错别字，排版精致，风格统一。"#;

pub const CONCEPT_IMAGE_TEMPLATE: &str = "{style_prefix}\n\n=== IMAGE CONTENT ===\n{page_content}";

pub const CONCEPT_ANALYZE_TEMPLATE: &str = r#"你是一个概念分析专家。请分析以下文章，提取核心要点。

**任务：**
1. 识别文章的核心主题和论点
2. 提取不超过{max_concepts}个关键概念
3. 为每个概念找出文章中最有力的原文引文
4. 识别概念之间的层级关系或逻辑关系
5. 为每个概念推荐适合的可视化类型（hierarchy、comparison、network、flowchart、terrain、attractor）

**输出格式（必须是有效JSON）：**
```json
{
  "main_theme": "文章主题的一句话总结",
  "key_concepts": [
    {
      "id": "concept_1",
      "name": "概念名称（简短英文）",
      "name_cn": "概念中文名称",
      "description": "概念描述（1-2句话）",
      "key_quote": "原文引文",
      "visualization_type": "hierarchy",
      "importance": 8
    }
  ],
  "relationships": [
    {"from": "concept_1", "to": "concept_2", "type": "contains|constrains|enables|contrasts"}
  ]
}
```

**文章内容：**
---
{article}
---

请直接输出JSON，不要有任何其他文字。"#;

pub const CONCEPT_MAP_TEMPLATE: &str = r#"你是一个跨学科理论家，擅长将概念映射到科学和哲学框架。

**可用的理论框架库：**

{frameworks}

**任务：**
对于每个输入的概念，选择1-2个最合适的理论框架进行映射，并：
1. 解释映射关系
2. 生成一个基于框架的新标题（全大写英文）
3. 提供理论框架带来的新洞察
4. 如果框架有推荐图表，请在输出中包含

**输入概念：**
```json
{concepts}
```

**输出格式（必须是有效JSON）：**
```json
{
  "mappings": [
    {
      "concept_id": "原概念ID",
      "original_name": "原概念名称",
      "framework": "映射的理论框架ID",
      "framework_name": "理论框架名称",
      "mapping_explanation": "映射解释",
      "new_title": "THE NEW TITLE IN CAPS",
      "subtitle": "可选的副标题",
      "insight": "理论框架带来的新洞察",
      "visual_metaphor": "建议的视觉隐喻",
      "recommended_chart": "框架推荐的图表类型（如有）",
      "alternative_charts": ["备选图表类型1", "备选图表类型2"]
    }
  ]
}
```

请直接输出JSON，不要有任何其他文字。"#;

pub const CONCEPT_DESIGN_TEMPLATE: &str = r#"你是一位专业的技术文档设计师，擅长创建概念可视化图。

**统一样式规范：**
{style_prefix}

**可用图表类型：**
{chart_types}

**图表选择优先级：**
1. 首选映射结果中的 `recommended_chart`
2. 不适合时从 `alternative_charts` 中选择
3. 都没有或都不适合时从完整图表库自由选择

**输入的映射结果：**
```json
{mappings}
```

**任务：**
为每个概念设计图像提示词（英文）。

**输出JSON格式：**
```json
{
  "designs": [
    {
      "concept_id": "c1",
      "title": "中文标题(15字内)",
      "chart_type": "图表类型",
      "visual_elements": ["元素1", "元素2", "元素3"],
      "image_prompt": "Technical infographic. [描述主图和布局，80-120词]. 4K resolution."
    }
  ]
}
```

**规则：**
- image_prompt 必须英文，80-120词，以"Technical infographic."开头
- 只输出JSON，无其他文字"#;

/// Replace every `{key}` with its value. Unknown placeholders are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

/// Template used to turn one page into an image prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePromptTemplate {
    template: String,
    style_prefix: String,
}

impl PagePromptTemplate {
    pub fn full() -> Self {
        Self::custom(PAGE_IMAGE_TEMPLATE)
    }

    pub fn short() -> Self {
        Self::custom(PAGE_IMAGE_SHORT_TEMPLATE)
    }

    /// Full or short template depending on the image provider's `short_prompt` flag.
    pub fn for_provider(short_prompt: bool) -> Self {
        if short_prompt {
            Self::short()
        } else {
            Self::full()
        }
    }

    /// Style prefix over the design's own prompt; the bare prompt when there is no prefix.
    pub fn concept(style_prefix: &str) -> Self {
        if style_prefix.trim().is_empty() {
            return Self::custom("{page_content}");
        }
        Self {
            template: CONCEPT_IMAGE_TEMPLATE.to_string(),
            style_prefix: style_prefix.to_string(),
        }
    }

    pub fn custom(template: &str) -> Self {
        Self {
            template: template.to_string(),
            style_prefix: String::new(),
        }
    }

    pub fn render(
        &self,
        page_content: &str,
        page_type: &str,
        full_outline: &str,
        user_topic: Option<&str>,
    ) -> String {
        let topic = user_topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNSPECIFIED_TOPIC);
        render(
            &self.template,
            &[
                ("page_content", page_content),
                ("page_type", page_type),
                ("full_outline", full_outline),
                ("user_topic", topic),
                ("style_prefix", &self.style_prefix),
            ],
        )
    }
}

impl Default for PagePromptTemplate {
    fn default() -> Self {
        Self::full()
    }
}
