//! Operator contracts: the positional typing discipline for operands.
//!
//! A contract lists `Term`s, one per operand position. A `One` term
//! consumes exactly one position; a `Many` term sits last and absorbs
//! every remaining position, with a minimum count. Abstract term types
//! (`Number`, `Any`) widen what a position accepts without ever
//! appearing as the type of a finalised expression.

use crate::operator::OpCode;
use crate::types::Type;

/// How many operands one term consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// One positional slot of an operator's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub ty: Type,
    pub cardinality: Cardinality,
    /// Fewest operands a `Many` term accepts.
    pub min: usize,
}

impl Term {
    pub const fn one(ty: Type) -> Term {
        Term {
            ty,
            cardinality: Cardinality::One,
            min: 1,
        }
    }

    pub const fn many(ty: Type, min: usize) -> Term {
        Term {
            ty,
            cardinality: Cardinality::Many,
            min,
        }
    }

    /// Whether an operand with static type `actual` satisfies this term.
    pub fn fulfilled_by(&self, actual: Type) -> bool {
        self.ty.accepts(actual)
    }
}

/// An operator's declared return type and operand terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub opcode: OpCode,
    pub return_type: Type,
    pub terms: Vec<Term>,
}

impl Contract {
    /// The term governing the 0-based operand position, or `None` when
    /// every term is saturated.
    pub fn term_at(&self, position: usize) -> Option<&Term> {
        let mut remaining = position;
        for term in &self.terms {
            match term.cardinality {
                Cardinality::One => {
                    if remaining == 0 {
                        return Some(term);
                    }
                    remaining -= 1;
                }
                Cardinality::Many => return Some(term),
            }
        }
        None
    }

    /// Fewest operands that satisfy every term.
    pub fn min_operands(&self) -> usize {
        self.terms
            .iter()
            .map(|t| match t.cardinality {
                Cardinality::One => 1,
                Cardinality::Many => t.min,
            })
            .sum()
    }

    /// Most operands the contract accepts, or `None` when a `Many` term
    /// makes it unbounded.
    pub fn max_operands(&self) -> Option<usize> {
        let mut max = 0;
        for term in &self.terms {
            match term.cardinality {
                Cardinality::One => max += 1,
                Cardinality::Many => return None,
            }
        }
        Some(max)
    }

    /// 0-based operand positions covered by `Many` terms of the given
    /// type, for `total` pushed operands.
    pub(crate) fn many_positions(&self, ty: Type, total: usize) -> Vec<usize> {
        let mut positions = Vec::new();
        for pos in 0..total {
            if let Some(term) = self.term_at(pos) {
                if term.cardinality == Cardinality::Many && term.ty == ty {
                    positions.push(pos);
                }
            }
        }
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_contract() -> Contract {
        Contract {
            opcode: OpCode::In,
            return_type: Type::Bool,
            terms: vec![Term::one(Type::Any), Term::many(Type::Any, 1)],
        }
    }

    fn not_contract() -> Contract {
        Contract {
            opcode: OpCode::Not,
            return_type: Type::Bool,
            terms: vec![Term::one(Type::Bool)],
        }
    }

    #[test]
    fn one_terms_consume_single_positions() {
        let contract = not_contract();
        assert!(contract.term_at(0).is_some());
        assert!(contract.term_at(1).is_none());
        assert_eq!(contract.min_operands(), 1);
        assert_eq!(contract.max_operands(), Some(1));
    }

    #[test]
    fn trailing_many_term_absorbs_the_rest() {
        let contract = in_contract();
        assert_eq!(contract.term_at(0).unwrap().cardinality, Cardinality::One);
        for pos in 1..10 {
            assert_eq!(
                contract.term_at(pos).unwrap().cardinality,
                Cardinality::Many
            );
        }
        assert_eq!(contract.min_operands(), 2);
        assert_eq!(contract.max_operands(), None);
    }

    #[test]
    fn abstract_term_types_widen_acceptance() {
        let number = Term::many(Type::Number, 2);
        assert!(number.fulfilled_by(Type::Int64));
        assert!(number.fulfilled_by(Type::Float64));
        assert!(!number.fulfilled_by(Type::String));

        let any = Term::one(Type::Any);
        assert!(any.fulfilled_by(Type::Bool));
        assert!(any.fulfilled_by(Type::String));
    }

    #[test]
    fn many_positions_skips_one_terms() {
        let contract = in_contract();
        assert_eq!(contract.many_positions(Type::Any, 4), vec![1, 2, 3]);

        let number = Contract {
            opcode: OpCode::Add,
            return_type: Type::Number,
            terms: vec![Term::many(Type::Number, 2)],
        };
        assert_eq!(number.many_positions(Type::Number, 3), vec![0, 1, 2]);
        assert_eq!(number.many_positions(Type::Any, 3), Vec::<usize>::new());
    }
}
