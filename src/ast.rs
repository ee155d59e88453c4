use std::fmt;

pub type Var = String;

pub type Atom = String;

/// A surface term: an S-expression tree of symbols and variables. `Atom` is
/// the 0-arity case; compile rewrites it as a 0-arity structure.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Term {
    Atom(Atom),
    Clause(Atom, Vec<Term>),
    Var(Var),
}

impl Term {
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_owned())
    }

    pub fn var(name: &str) -> Self {
        Term::Var(name.to_owned())
    }

    pub fn clause(name: &str, args: Vec<Term>) -> Self {
        Term::Clause(name.to_owned(), args)
    }

    pub fn name(&self) -> Option<&Atom> {
        match self {
            Term::Atom(ref name) | Term::Clause(ref name, _) => Some(name),
            Term::Var(_) => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Clause(_, ref args) => args.len(),
            _ => 0,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Term::Atom(name) | Term::Var(name) => write!(f, "{}", name),
            Term::Clause(name, args) => {
                write!(f, "({}", name)?;

                for arg in args {
                    write!(f, " {}", arg)?;
                }

                write!(f, ")")
            }
        }
    }
}

/// Register classes. `Temp` registers are the shared argument/local bank of
/// the machine; `Perm` registers are slots of the current environment frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RegType {
    Perm(usize),
    Temp(usize),
}

impl Default for RegType {
    fn default() -> Self {
        RegType::Temp(0)
    }
}

impl RegType {
    pub fn reg_num(self) -> usize {
        match self {
            RegType::Perm(reg_num) | RegType::Temp(reg_num) => reg_num,
        }
    }

    pub fn is_perm(self) -> bool {
        matches!(self, RegType::Perm(_))
    }
}

/// Whether an instruction operates on an argument register of the current
/// call (shallow) or on a register holding a subterm (deep).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Deep,
    Shallow,
}
