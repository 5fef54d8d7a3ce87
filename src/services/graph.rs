use crate::services::workflow::Stage;

/// Graphviz rendering of the stage sequence, including the entry points the
/// resume check can pick and the early stop after the PDF.
pub fn render_stage_graph() -> String {
    let mut dot = String::from("digraph storybook {\n    rankdir=LR;\n    node [shape=box];\n");
    dot.push_str("    entry [shape=diamond, label=\"resolve entry\"];\n");
    dot.push_str("    stop [shape=doublecircle, label=\"Stop\"];\n");

    for stage in Stage::ALL {
        dot.push_str(&format!("    {} [label=\"{}\"];\n", stage.node_id(), stage.name()));
    }

    for pair in Stage::ALL.windows(2) {
        dot.push_str(&format!(
            "    {} -> {} [label=\"{}\"];\n",
            pair[0].node_id(),
            pair[1].node_id(),
            pair[1].consumes()
        ));
    }

    let entry_points = [
        (Stage::Intake, "Start"),
        (Stage::Summarize, "RawText"),
        (Stage::PromptGeneration, "Story"),
        (Stage::ImageGeneration, "Prompts"),
        (Stage::ComposePdf, "Images"),
        (Stage::Narrate, "Pdf"),
    ];
    for (stage, event) in entry_points {
        dot.push_str(&format!(
            "    entry -> {} [label=\"{}\", style=dashed];\n",
            stage.node_id(),
            event
        ));
    }

    dot.push_str("    entry -> stop [label=\"rejected / done\", style=dashed];\n");
    dot.push_str(&format!(
        "    {} -> stop [label=\"pdf only\", style=dashed];\n",
        Stage::ComposePdf.node_id()
    ));
    dot.push_str(&format!("    {} -> stop;\n", Stage::ComposeVideo.node_id()));
    dot.push_str("}\n");
    dot
}
