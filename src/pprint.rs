use itertools::Itertools;
use prettytable::{self, format, row, Table};

use crate::backend::recording::RecordedDispatch;
use crate::tensorinfo::TensorInfo;
use crate::window::Window;

/// Prints each operand's layout after configuration, followed by the window.
pub fn pprint_configuration(operands: &[(&str, &TensorInfo)], window: &Window) {
    print!("{}", configuration_string(operands, window));
}

pub fn configuration_string(operands: &[(&str, &TensorInfo)], window: &Window) -> String {
    let mut out = configuration_table(operands).to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("window {window}\n"));
    out
}

pub fn configuration_table(operands: &[(&str, &TensorInfo)]) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["Operand", "Tensor", "Padding", "Valid region", "Strides"]);
    for (name, info) in operands {
        let strides = info.strides()[..info.num_dimensions()].iter().join(" ");
        table.add_row(row![
            name,
            info,
            info.padding(),
            info.valid_region(),
            strides
        ]);
    }
    table.set_format(compact_format());
    table
}

pub fn pprint_dispatches(dispatches: &[RecordedDispatch]) {
    dispatches_table(dispatches).printstd();
}

pub fn dispatches_table(dispatches: &[RecordedDispatch]) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["#", "Program", "Extent", "Arguments"]);
    for (i, dispatch) in dispatches.iter().enumerate() {
        table.add_row(row![
            i,
            format!("{}#{}", dispatch.program, dispatch.program_id),
            dispatch.extent,
            dispatch.args.iter().join(" ")
        ]);
    }
    table.set_format(compact_format());
    table
}

fn compact_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build()
}
