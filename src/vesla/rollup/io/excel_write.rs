use std::path::Path;

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Formula, Note, Workbook};
use tracing::debug;

use crate::vesla::rollup::emitted::{EmittedContent, EmittedModel};
use crate::vesla::rollup::error::Result;
use crate::vesla::rollup::io::write_atomically;
use crate::vesla::rollup::model::{NumberFormat, StyleTag};

const INPUT_FILL: u32 = 0xFFF2CC;
const CALCULATED_FILL: u32 = 0xE2EFDA;
const TOTAL_FILL: u32 = 0xF4B183;
const HEADER_FILL: u32 = 0x2F5496;
const SECTION_FILL: u32 = 0xD6E4F0;
const SECTION_FONT: u32 = 0x2F5496;
const NOTE_FONT: u32 = 0x808080;

/// Writes the emitted model to the given path as an `.xlsx` workbook.
///
/// The file is serialised in memory first and moved into place only once
/// complete, so a failed write never leaves a partial workbook behind.
pub fn write_workbook(path: &Path, model: &EmittedModel) -> Result<()> {
    let mut workbook = Workbook::new();

    for sheet in &model.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        for width in &sheet.column_widths {
            worksheet.set_column_width(width.column, width.width)?;
        }

        // Merge first; the anchor cell's own write below then fills in its value.
        for range in &sheet.merged_ranges {
            let format = sheet
                .cell(range.first)
                .map(|cell| cell_format(cell.style, cell.number_format))
                .unwrap_or_else(Format::new);
            worksheet.merge_range(
                range.first.row,
                range.first.col,
                range.last.row,
                range.last.col,
                "",
                &format,
            )?;
        }

        for cell in &sheet.cells {
            let (row, col) = (cell.position.row, cell.position.col);
            let format = cell_format(cell.style, cell.number_format);
            match &cell.content {
                EmittedContent::Number { value } => {
                    worksheet.write_number_with_format(row, col, *value, &format)?;
                }
                EmittedContent::Text { value } => {
                    worksheet.write_string_with_format(row, col, value.as_str(), &format)?;
                }
                EmittedContent::Formula { formula, value } => {
                    let formula = Formula::new(formula.as_str()).set_result(value.to_string());
                    worksheet.write_formula_with_format(row, col, formula, &format)?;
                }
            }
            if let Some(provenance) = &cell.provenance {
                worksheet.insert_note(row, col, &Note::new(provenance.as_str()))?;
            }
        }
        debug!(sheet = %sheet.name, cells = sheet.cells.len(), "worksheet written");
    }

    let buffer = workbook.save_to_buffer()?;
    write_atomically(path, &buffer)
}

/// Builds the format for one cell. Formats are values, never shared between
/// cells.
fn cell_format(style: StyleTag, number_format: NumberFormat) -> Format {
    let mut format = Format::new();
    if let Some(pattern) = number_format.pattern() {
        format = format.set_num_format(pattern);
    }

    match style {
        StyleTag::Input => format
            .set_bold()
            .set_background_color(INPUT_FILL)
            .set_border(FormatBorder::Thin),
        StyleTag::Calculated => format
            .set_background_color(CALCULATED_FILL)
            .set_border(FormatBorder::Thin),
        StyleTag::Total => format
            .set_bold()
            .set_background_color(TOTAL_FILL)
            .set_border(FormatBorder::Thin),
        StyleTag::Header => format
            .set_bold()
            .set_font_color(0xFFFFFF)
            .set_background_color(HEADER_FILL)
            .set_align(FormatAlign::Center)
            .set_text_wrap()
            .set_border(FormatBorder::Thin),
        StyleTag::Section => format
            .set_bold()
            .set_font_color(SECTION_FONT)
            .set_background_color(SECTION_FILL)
            .set_border(FormatBorder::Thin),
        StyleTag::Note => format.set_font_size(9).set_font_color(NOTE_FONT),
        StyleTag::Plain => format,
    }
}
