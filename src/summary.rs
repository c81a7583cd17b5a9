/// One rendered piece of a summary document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryBlock {
    Heading(String),
    Bullet { text: String, warning: bool },
    Paragraph(String),
    /// Paragraph break; runs of blank lines collapse into one.
    Spacer,
}

const HEADING: &str = "## ";
const BULLET: &str = "- ";
const WARNING_SIGN: char = '⚠';

/// Split a summary into blocks: `## ` headings, `- ` bullets (flagged when
/// they carry a warning sign) and plain paragraphs.
pub fn render_summary(text: &str) -> Vec<SummaryBlock> {
    let mut blocks = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            if !matches!(blocks.last(), None | Some(SummaryBlock::Spacer)) {
                blocks.push(SummaryBlock::Spacer);
            }
            continue;
        }
        let block = if let Some(title) = line.strip_prefix(HEADING) {
            SummaryBlock::Heading(title.trim().to_string())
        } else if let Some(item) = line.strip_prefix(BULLET) {
            SummaryBlock::Bullet {
                text: item.trim().to_string(),
                warning: item.contains(WARNING_SIGN),
            }
        } else {
            SummaryBlock::Paragraph(line.to_string())
        };
        blocks.push(block);
    }
    if blocks.last() == Some(&SummaryBlock::Spacer) {
        blocks.pop();
    }
    blocks
}
