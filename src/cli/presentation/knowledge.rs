//! Knowledge listing for the concept pipeline.

use crate::concept::KnowledgeRegistry;
use comfy_table::Table;

pub fn format_knowledge_text(registry: &KnowledgeRegistry) -> String {
    let mut frameworks = Table::new();
    frameworks.load_preset(comfy_table::presets::UTF8_FULL);
    frameworks.set_header(vec!["Framework", "Name", "Canonical chart"]);
    for f in registry.frameworks() {
        frameworks.add_row(vec![
            f.id.clone(),
            f.name.clone(),
            f.canonical_chart.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }

    let mut charts = Table::new();
    charts.load_preset(comfy_table::presets::UTF8_FULL);
    charts.set_header(vec!["Chart type", "Name", "Best for"]);
    for c in registry.chart_types() {
        charts.add_row(vec![c.id.clone(), c.name.clone(), c.best_for.join(", ")]);
    }

    let mut styles = Table::new();
    styles.load_preset(comfy_table::presets::UTF8_FULL);
    styles.set_header(vec!["Visual style", "Name", "Description"]);
    for s in registry.visual_styles() {
        styles.add_row(vec![s.id.clone(), s.name.clone(), s.description.clone()]);
    }

    format!("{}\n\n{}\n\n{}", frameworks, charts, styles)
}
