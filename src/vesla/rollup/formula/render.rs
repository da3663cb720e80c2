use crate::vesla::rollup::formula::{Expr, Operand, ResolvedExpr};
use crate::vesla::rollup::model::SheetId;
use crate::vesla::rollup::model::sheet::quote_sheet_name;
use crate::vesla::rollup::resolve::ResolvedAddress;

const PREC_ADDITIVE: u8 = 1;
const PREC_MULTIPLICATIVE: u8 = 2;
const PREC_ATOM: u8 = 3;

impl ResolvedExpr {
    /// Renders the expression as an A1 formula (`=B5*'Unit Prices'!B6`) for a
    /// cell living on `home`. References to `home` stay unqualified.
    pub fn to_formula(&self, home: SheetId) -> String {
        let mut out = String::from("=");
        write_expr(self, home, &mut out);
        out
    }
}

fn precedence(expr: &ResolvedExpr) -> u8 {
    match expr {
        Expr::Subtract(..) => PREC_ADDITIVE,
        Expr::Multiply(..) | Expr::Divide(..) | Expr::Scale(..) => PREC_MULTIPLICATIVE,
        Expr::Sum(_) | Expr::Link(_) => PREC_ATOM,
    }
}

fn write_expr(expr: &ResolvedExpr, home: SheetId, out: &mut String) {
    let prec = precedence(expr);
    match expr {
        Expr::Multiply(a, b) => write_binary(a, "*", b, prec, home, out),
        Expr::Subtract(a, b) => write_binary(a, "-", b, prec, home, out),
        Expr::Divide(a, b) => write_binary(a, "/", b, prec, home, out),
        Expr::Scale(a, factor) => {
            write_operand(a, prec, false, home, out);
            out.push('*');
            out.push_str(&number_text(*factor));
        }
        Expr::Link(address) => out.push_str(&address_text(address, home)),
        Expr::Sum(items) => {
            out.push_str("SUM(");
            write_sum_arguments(items, home, out);
            out.push(')');
        }
    }
}

fn write_binary(
    lhs: &Operand<ResolvedAddress>,
    op: &str,
    rhs: &Operand<ResolvedAddress>,
    prec: u8,
    home: SheetId,
    out: &mut String,
) {
    write_operand(lhs, prec, false, home, out);
    out.push_str(op);
    write_operand(rhs, prec, true, home, out);
}

fn write_operand(
    operand: &Operand<ResolvedAddress>,
    parent_prec: u8,
    right_side: bool,
    home: SheetId,
    out: &mut String,
) {
    match operand {
        Operand::Ref(address) => out.push_str(&address_text(address, home)),
        Operand::Const(value) => out.push_str(&number_text(*value)),
        Operand::Nested(inner) => {
            let child = precedence(inner);
            // Right operands keep their grouping so the spreadsheet evaluates
            // the same tree that was declared.
            let wrap = child < parent_prec || (right_side && child == parent_prec);
            if wrap {
                out.push('(');
            }
            write_expr(inner, home, out);
            if wrap {
                out.push(')');
            }
        }
    }
}

fn write_sum_arguments(items: &[Operand<ResolvedAddress>], home: SheetId, out: &mut String) {
    let mut idx = 0;
    let mut first = true;
    while idx < items.len() {
        if !first {
            out.push(',');
        }
        first = false;

        if let Operand::Ref(start) = &items[idx] {
            let run = run_length(&items[idx..]);
            if run >= 2 {
                if let Operand::Ref(end) = &items[idx + run - 1] {
                    out.push_str(&range_text(start, end, home));
                    idx += run;
                    continue;
                }
            }
        }
        write_operand(&items[idx], 0, false, home, out);
        idx += 1;
    }
}

/// Length of the run of consecutive cells (down one column or along one row)
/// at the head of `items`.
fn run_length(items: &[Operand<ResolvedAddress>]) -> usize {
    let Some(Operand::Ref(first)) = items.first() else {
        return 0;
    };
    let mut len = 1;
    let mut step: Option<(u32, u16)> = None;
    let mut prev = first;
    for item in &items[1..] {
        let Operand::Ref(next) = item else { break };
        if next.sheet_id != first.sheet_id {
            break;
        }
        let down = next.position.col == prev.position.col
            && next.position.row == prev.position.row + 1;
        let across = next.position.row == prev.position.row
            && next.position.col == prev.position.col + 1;
        let this_step = match (down, across) {
            (true, _) => (1, 0),
            (_, true) => (0, 1),
            _ => break,
        };
        if step.is_some_and(|s| s != this_step) {
            break;
        }
        step = Some(this_step);
        prev = next;
        len += 1;
    }
    len
}

pub(crate) fn address_text(address: &ResolvedAddress, home: SheetId) -> String {
    if address.sheet_id == home {
        address.position.to_a1()
    } else {
        format!("{}!{}", quote_sheet_name(&address.sheet), address.position.to_a1())
    }
}

fn range_text(start: &ResolvedAddress, end: &ResolvedAddress, home: SheetId) -> String {
    format!("{}:{}", address_text(start, home), end.position.to_a1())
}

fn number_text(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if value < 0.0 {
        format!("({value})")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vesla::rollup::model::Position;

    fn at(sheet: usize, name: &str, row: u32, col: u16) -> Operand<ResolvedAddress> {
        Operand::Ref(ResolvedAddress {
            sheet: name.to_string(),
            sheet_id: SheetId(sheet),
            position: Position::new(row, col),
        })
    }

    #[test]
    fn renders_products_with_cross_sheet_qualification() {
        let expr = Expr::Multiply(at(1, "Usage", 2, 1), at(0, "Unit Prices", 5, 1));
        assert_eq!(expr.to_formula(SheetId(1)), "=B3*'Unit Prices'!B6");
    }

    #[test]
    fn parenthesises_only_where_needed() {
        let difference = Expr::Subtract(at(0, "S", 0, 0), at(0, "S", 1, 0));
        let expr = Expr::Multiply(Operand::Nested(Box::new(difference.clone())), Operand::Const(2.0));
        assert_eq!(expr.to_formula(SheetId(0)), "=(A1-A2)*2");

        let quotient = Expr::Divide(at(0, "S", 0, 0), at(0, "S", 1, 0));
        let expr = Expr::Divide(Operand::Const(1.0), Operand::Nested(Box::new(quotient)));
        assert_eq!(expr.to_formula(SheetId(0)), "=1/(A1/A2)");

        let expr = Expr::Subtract(Operand::Nested(Box::new(difference)), Operand::Const(-3.0));
        assert_eq!(expr.to_formula(SheetId(0)), "=A1-A2-(-3)");
    }

    #[test]
    fn sums_collapse_consecutive_cells_into_ranges() {
        let expr = Expr::Sum(vec![
            at(0, "Data Volume", 7, 3),
            at(0, "Data Volume", 8, 3),
            at(0, "Data Volume", 9, 3),
            at(0, "Data Volume", 2, 4),
            Operand::Const(5.0),
        ]);
        assert_eq!(expr.to_formula(SheetId(1)), "=SUM('Data Volume'!D8:D10,'Data Volume'!E3,5)");
        assert_eq!(expr.to_formula(SheetId(0)), "=SUM(D8:D10,E3,5)");
    }

    #[test]
    fn sums_keep_insertion_order() {
        let expr = Expr::Sum(vec![at(0, "S", 1, 0), at(0, "S", 0, 0)]);
        assert_eq!(expr.to_formula(SheetId(0)), "=SUM(A2,A1)");
    }
}
