//! Knowledge registry: theory frameworks, chart types and visual styles.
//!
//! Built-in entries are always present. A knowledge directory may override or add
//! entries with one TOML file per entry under `frameworks/`, `chart_types/` and
//! `visual_styles/`; the entry id is the file's `id` key, else the file stem.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_STYLE: &str = "blueprint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framework {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub visual_elements: Vec<String>,
    #[serde(default)]
    pub use_when: String,
    #[serde(default)]
    pub canonical_chart: Option<String>,
    #[serde(default)]
    pub suggested_charts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartType {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub best_for: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualStyle {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub style_prefix: String,
}

/// Entries that carry their own id.
trait KnowledgeEntry: for<'de> Deserialize<'de> {
    fn id_mut(&mut self) -> &mut String;
}

impl KnowledgeEntry for Framework {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

impl KnowledgeEntry for ChartType {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

impl KnowledgeEntry for VisualStyle {
    fn id_mut(&mut self) -> &mut String {
        &mut self.id
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeRegistry {
    frameworks: BTreeMap<String, Framework>,
    chart_types: BTreeMap<String, ChartType>,
    visual_styles: BTreeMap<String, VisualStyle>,
}

impl Default for KnowledgeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KnowledgeRegistry {
    /// Built-in entries only.
    pub fn builtin() -> Self {
        Self {
            frameworks: index(default_frameworks(), |f| f.id.clone()),
            chart_types: index(default_chart_types(), |c| c.id.clone()),
            visual_styles: index(default_visual_styles(), |s| s.id.clone()),
        }
    }

    /// Built-in entries plus overrides from `dir`. A missing directory is not an error.
    pub fn load(dir: &Path) -> Result<Self, StorageError> {
        let mut registry = Self::builtin();
        registry
            .frameworks
            .extend(load_entries::<Framework>(&dir.join("frameworks"))?);
        registry
            .chart_types
            .extend(load_entries::<ChartType>(&dir.join("chart_types"))?);
        registry
            .visual_styles
            .extend(load_entries::<VisualStyle>(&dir.join("visual_styles"))?);
        debug!(
            dir = %dir.display(),
            frameworks = registry.frameworks.len(),
            chart_types = registry.chart_types.len(),
            visual_styles = registry.visual_styles.len(),
            "Knowledge registry loaded"
        );
        Ok(registry)
    }

    pub fn framework(&self, id: &str) -> Option<&Framework> {
        self.frameworks.get(id)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &Framework> {
        self.frameworks.values()
    }

    pub fn chart_type(&self, id: &str) -> Option<&ChartType> {
        self.chart_types.get(id)
    }

    pub fn chart_types(&self) -> impl Iterator<Item = &ChartType> {
        self.chart_types.values()
    }

    pub fn visual_styles(&self) -> impl Iterator<Item = &VisualStyle> {
        self.visual_styles.values()
    }

    pub fn has_visual_style(&self, id: &str) -> bool {
        self.visual_styles.contains_key(id)
    }

    /// Style by id; unknown ids fall back to `blueprint`.
    pub fn visual_style(&self, id: &str) -> Option<&VisualStyle> {
        self.visual_styles
            .get(id)
            .or_else(|| self.visual_styles.get(DEFAULT_STYLE))
    }

    /// Framework catalogue as rendered into the map prompt.
    pub fn frameworks_for_prompt(&self) -> String {
        let mut lines = Vec::new();
        for framework in self.frameworks.values() {
            lines.push(format!("### {} (ID: {})", framework.name, framework.id));
            lines.push(format!("- 描述: {}", or_na(&framework.description)));
            lines.push(format!("- 关键词: {}", framework.keywords.join(", ")));
            lines.push(format!("- 视觉元素: {}", framework.visual_elements.join(", ")));
            lines.push(format!("- 适用场景: {}", or_na(&framework.use_when)));
            if let Some(chart) = &framework.canonical_chart {
                if framework.suggested_charts.is_empty() {
                    lines.push(format!("- 推荐图表: {}", chart));
                } else {
                    lines.push(format!(
                        "- 推荐图表: {}, 备选: {}",
                        chart,
                        framework.suggested_charts.join(", ")
                    ));
                }
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// Chart catalogue as rendered into the design prompt.
    pub fn chart_types_for_prompt(&self) -> String {
        self.chart_types
            .values()
            .map(|chart| {
                format!(
                    "- **{}** ({}): {}\n  适用于: {}",
                    chart.id,
                    chart.name,
                    or_na(&chart.description),
                    chart.best_for.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn or_na(text: &str) -> &str {
    if text.trim().is_empty() {
        "N/A"
    } else {
        text
    }
}

fn index<T>(items: Vec<T>, key: impl Fn(&T) -> String) -> BTreeMap<String, T> {
    items.into_iter().map(|item| (key(&item), item)).collect()
}

/// Parse every `*.toml` in `dir`. Unparseable files are skipped with a warning.
fn load_entries<T: KnowledgeEntry>(dir: &Path) -> Result<BTreeMap<String, T>, StorageError> {
    let mut entries = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(entries);
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    for path in paths {
        let raw = std::fs::read_to_string(&path)?;
        match toml::from_str::<T>(&raw) {
            Ok(mut entry) => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let id = entry.id_mut();
                if id.trim().is_empty() {
                    *id = stem;
                }
                entries.insert(id.clone(), entry);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Skipping unparseable knowledge file");
            }
        }
    }
    Ok(entries)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[allow(clippy::too_many_arguments)]
fn framework(
    id: &str,
    name: &str,
    name_en: &str,
    origin: &str,
    description: &str,
    keywords: &[&str],
    visual_elements: &[&str],
    use_when: &str,
    canonical_chart: &str,
    suggested_charts: &[&str],
) -> Framework {
    Framework {
        id: id.to_string(),
        name: name.to_string(),
        name_en: name_en.to_string(),
        origin: origin.to_string(),
        description: description.to_string(),
        keywords: strings(keywords),
        visual_elements: strings(visual_elements),
        use_when: use_when.to_string(),
        canonical_chart: Some(canonical_chart.to_string()),
        suggested_charts: strings(suggested_charts),
    }
}

fn default_frameworks() -> Vec<Framework> {
    vec![
        framework(
            "agapism",
            "Agapism (爱智论)",
            "Agapism",
            "Charles Sanders Peirce",
            "通过吸引/爱/内在驱动实现发展，而非外部强制",
            &["attraction", "love", "internal motivation", "identity", "desire"],
            &["magnetic field lines", "attractor basin", "flowing curves"],
            "概念涉及内在动机、价值认同、自发趋向",
            "attractor",
            &["network", "terrain"],
        ),
        framework(
            "anancism",
            "Anancism (必然论)",
            "Anancism",
            "Charles Sanders Peirce",
            "通过规则、约束、机械因果实现控制",
            &["rules", "constraints", "mechanical", "rigid", "necessity"],
            &["geometric lattice", "rigid structures", "interlocking beams"],
            "概念涉及硬性规则、机械约束、强制执行",
            "matrix",
            &["flowchart", "network"],
        ),
        framework(
            "goodhart",
            "Goodhart's Law (古德哈特定律)",
            "Goodhart's Law",
            "Charles Goodhart",
            "当度量成为目标时，它就不再是好的度量",
            &["metric", "optimization", "gaming", "proxy", "target"],
            &["diverging lines", "gap visualization", "optimization curves"],
            "概念涉及优化陷阱、指标失效、目标与度量的偏离",
            "comparison",
            &["terrain", "timeline"],
        ),
        framework(
            "moloch",
            "Moloch Trap (莫洛克陷阱)",
            "Moloch Trap",
            "Scott Alexander / Coordination Theory",
            "个体理性导致集体非理性的协调失败",
            &["coordination", "collective", "trap", "race", "competition"],
            &["converging arrows", "trap structure", "race to bottom"],
            "概念涉及协调失败、竞争困境、集体行动问题",
            "terrain",
            &["network", "cycle"],
        ),
        framework(
            "multi_scale",
            "Multi-Scale Alignment (多尺度对齐)",
            "Multi-Scale Alignment",
            "Systems Theory / AI Alignment",
            "不同层级目标之间的协调与约束传递",
            &["hierarchy", "levels", "priority", "constraint", "scale"],
            &["pyramid", "layered structure", "bidirectional arrows"],
            "概念涉及层级结构、优先级排序、跨层级协调",
            "pyramid",
            &["flowchart", "network"],
        ),
        framework(
            "circuit_breaker",
            "Circuit Breaker (断路器模式)",
            "Circuit Breaker Pattern",
            "Software Engineering / Resilience Patterns",
            "检测异常并自动中断以防止级联失败",
            &["detect", "stop", "reset", "monitor", "safeguard"],
            &["flowchart with decision", "stop sign", "feedback loop"],
            "概念涉及安全机制、自检系统、异常处理",
            "flowchart",
            &["cycle", "comparison"],
        ),
        framework(
            "attractor",
            "Attractor Dynamics (吸引子动力学)",
            "Attractor Dynamics",
            "Dynamical Systems Theory",
            "系统自然趋向某些稳定状态的倾向",
            &["basin", "valley", "landscape", "convergence", "stability"],
            &["3D terrain", "valleys and peaks", "basin of attraction"],
            "概念涉及稳定状态、自然趋向、能量最小化",
            "terrain",
            &["attractor", "network"],
        ),
    ]
}

fn chart(id: &str, name: &str, name_en: &str, description: &str, best_for: &[&str]) -> ChartType {
    ChartType {
        id: id.to_string(),
        name: name.to_string(),
        name_en: name_en.to_string(),
        description: description.to_string(),
        best_for: strings(best_for),
    }
}

fn default_chart_types() -> Vec<ChartType> {
    vec![
        chart("pyramid", "金字塔图", "Pyramid Chart", "展示层级关系或优先级排序",
            &["hierarchy", "priority", "levels", "importance ranking"]),
        chart("comparison", "对比图", "Comparison Chart", "展示二元对比或对立概念",
            &["contrast", "versus", "binary", "trade-off"]),
        chart("network", "网络图", "Network Diagram", "展示系统关系或多元连接",
            &["relationships", "system", "connections", "dependencies"]),
        chart("flowchart", "流程图", "Flowchart", "展示过程、决策或状态转换",
            &["process", "decision", "workflow", "state machine"]),
        chart("terrain", "地形图/热力图", "Terrain/Heatmap", "展示优化空间或权衡关系",
            &["optimization", "trade-off", "landscape", "gradient"]),
        chart("attractor", "吸引子图", "Attractor Diagram", "展示吸引/收敛/磁场效应",
            &["attraction", "convergence", "magnetic", "gravity"]),
        chart("timeline", "时间线", "Timeline", "展示时序发展或阶段演进",
            &["temporal", "evolution", "phases", "milestones"]),
        chart("venn", "韦恩图", "Venn Diagram", "展示集合关系或概念重叠",
            &["overlap", "intersection", "sets", "shared properties"]),
        chart("matrix", "矩阵图", "Matrix Chart", "展示二维分类或象限分析",
            &["2x2 analysis", "classification", "quadrants", "positioning"]),
        chart("cycle", "循环图", "Cycle Diagram", "展示循环过程或反馈回路",
            &["cycle", "feedback", "loop", "recurring process"]),
    ]
}

fn style(id: &str, name: &str, description: &str, colors: [&str; 3], style_prefix: &str) -> VisualStyle {
    let colors = ["primary", "secondary", "background"]
        .iter()
        .zip(colors)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    VisualStyle {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        colors,
        style_prefix: style_prefix.to_string(),
    }
}

fn default_visual_styles() -> Vec<VisualStyle> {
    vec![
        style(
            "blueprint",
            "技术蓝图风格",
            "工程图纸风格，适合技术/学术内容",
            ["#2F3370", "#8B7355", "#F5F0E1"],
            "Technical blueprint-style infographic on aged cream paper.\n\
             Title in dark maroon ALL CAPS. Teal and brown color scheme.\n\
             Clean technical illustration with bilingual labels.",
        ),
        style(
            "modern",
            "现代简约风格",
            "简洁现代，适合商业演示",
            ["#1A365D", "#38B2AC", "#F8F9FA"],
            "Modern minimalist infographic with clean white background.\n\
             Bold sans-serif typography. Flat design with sharp edges.",
        ),
        style(
            "academic",
            "学术论文风格",
            "严谨学术，适合研究内容",
            ["#000000", "#1A365D", "#FFFFFF"],
            "Academic paper figure style with minimal decoration.\n\
             High contrast, clear labels, suitable for publication.",
        ),
        style(
            "creative",
            "创意艺术风格",
            "艺术感强，适合创意内容",
            ["#805AD5", "#ED64A6", "#1A202C"],
            "Creative artistic infographic with gradient backgrounds.\n\
             Modern artistic style with subtle 3D effects and glows.",
        ),
    ]
}
