use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type Cplx = num::complex::Complex<f64>;

const I: Cplx = Cplx { re: 0.0, im: 1.0 };

/// A helper structure representing a parameter type of circuit elements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterBase {
    pub letter: char,
    pub limits: (f64, f64),
}

pub const RESISTANCE: ParameterBase = ParameterBase { letter: 'R', limits: (0.0, f64::INFINITY) };
pub const CAPACITY: ParameterBase = ParameterBase { letter: 'C', limits: (0.0, f64::INFINITY) };
pub const WARBURG_A: ParameterBase = ParameterBase { letter: 'A', limits: (0.0, f64::INFINITY) };
pub const WARBURG_D: ParameterBase = ParameterBase { letter: 'd', limits: (0.0, f64::INFINITY) };
pub const CPE_Q: ParameterBase = ParameterBase { letter: 'Q', limits: (0.0, f64::INFINITY) };
pub const CPE_N: ParameterBase = ParameterBase { letter: 'n', limits: (0.0, 1.0) };

/// A basic circuit element.
///
/// The Warburg comes in two flavors depending on how many parameters the
/// description supplies: `W_1` is semi-infinite diffusion, `W_1/W_2` is
/// finite-length diffusion with a transmissive boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Resistor,
    Capacitor,
    Cpe,
    Warburg,
    FiniteWarburg,
}

impl Element {
    pub fn letter(self) -> char {
        match self {
            Element::Resistor => 'R',
            Element::Capacitor => 'C',
            Element::Cpe => 'E',
            Element::Warburg | Element::FiniteWarburg => 'W',
        }
    }

    /// The parameters to provide when calculating the impedance
    pub fn paramlist(self) -> &'static [ParameterBase] {
        match self {
            Element::Resistor => &[RESISTANCE],
            Element::Capacitor => &[CAPACITY],
            Element::Cpe => &[CPE_Q, CPE_N],
            Element::Warburg => &[WARBURG_A],
            Element::FiniteWarburg => &[WARBURG_A, WARBURG_D],
        }
    }

    pub fn param_count(self) -> usize {
        self.paramlist().len()
    }

    fn impedance(self, omega: f64, params: &[f64]) -> Cplx {
        match self {
            Element::Resistor => Cplx::new(params[0], 0.0),
            Element::Capacitor => 1.0 / (I * omega * params[0]),
            Element::Cpe => {
                let q = params[0];
                let n = params[1];
                let numer = (-I * PI / 2.0 * n).exp();
                let denom = q * omega.powf(n);
                numer / denom
            }
            Element::Warburg => {
                let aw = params[0];
                aw / (I * omega).sqrt()
            }
            Element::FiniteWarburg => {
                let (aw, delta) = (params[0], params[1]);
                let sq = (I * omega).sqrt();
                aw * (delta * sq).tanh() / sq
            }
        }
    }
}

/// A circuit topology: nested series/parallel combinations of elements.
///
/// Parsed once from a description string such as `R_0-p(R_1,C_1)-W_1/W_2`
/// (series combination with `-`, parallel branches inside `p(...)`,
/// sub-parameters of two-parameter elements joined by `/`) and evaluated
/// directly as a tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Circuit {
    Element(Element),
    Series(Vec<Circuit>),
    Parallel(Vec<Circuit>),
}

impl Circuit {
    pub fn from_description(description: &str) -> Result<Self, Error> {
        let mut parser = Parser { src: description, pos: 0 };
        let circuit = parser.series()?;
        if parser.pos != parser.src.len() {
            return Err(Error::MalformedCircuit(format!(
                "unexpected `{}` after position {}",
                &parser.src[parser.pos..],
                parser.pos
            )));
        }
        Ok(circuit)
    }

    /// Total number of parameters consumed by the topology, in depth-first
    /// description order.
    pub fn parameter_count(&self) -> usize {
        match self {
            Circuit::Element(e) => e.param_count(),
            Circuit::Series(children) | Circuit::Parallel(children) => {
                children.iter().map(Circuit::parameter_count).sum()
            }
        }
    }

    pub fn element_count(&self) -> usize {
        match self {
            Circuit::Element(_) => 1,
            Circuit::Series(children) | Circuit::Parallel(children) => {
                children.iter().map(Circuit::element_count).sum()
            }
        }
    }

    /// Get a list of all circuit parameters, in the order the impedance
    /// calculation consumes them.
    pub fn paramlist(&self) -> Vec<ParameterBase> {
        match self {
            Circuit::Element(e) => e.paramlist().to_vec(),
            Circuit::Series(children) | Circuit::Parallel(children) => {
                children.iter().flat_map(Circuit::paramlist).collect()
            }
        }
    }

    /// Calculate the impedance value
    /// * `omega` is the angular frequency
    /// * `params` is the slice of circuit parameters in the order given by `paramlist`
    pub fn impedance(&self, omega: f64, params: &[f64]) -> Result<Cplx, Error> {
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(Error::ParameterArity { expected, actual: params.len() });
        }
        Ok(self.eval(omega, params))
    }

    /// Impedance across a frequency sweep (Hz), one value per point, each
    /// point evaluated independently.
    pub fn simulate(&self, params: &[f64], frequencies: &[f64]) -> Result<Vec<Cplx>, Error> {
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(Error::ParameterArity { expected, actual: params.len() });
        }
        Ok(frequencies.iter().map(|freq| self.eval(TAU * freq, params)).collect())
    }

    pub(crate) fn eval(&self, omega: f64, params: &[f64]) -> Cplx {
        match self {
            Circuit::Element(e) => e.impedance(omega, params),
            Circuit::Series(children) => {
                let mut cval = 0;
                let mut imped = Cplx::new(0.0, 0.0);
                for c in children {
                    let cend = cval + c.parameter_count();
                    imped += c.eval(omega, &params[cval..cend]);
                    cval = cend;
                }
                imped
            }
            Circuit::Parallel(children) => {
                let mut cval = 0;
                let mut admit = Cplx::new(0.0, 0.0);
                for c in children {
                    let cend = cval + c.parameter_count();
                    admit += 1.0 / c.eval(omega, &params[cval..cend]);
                    cval = cend;
                }
                1.0 / admit
            }
        }
    }

    fn write_description(&self, f: &mut fmt::Formatter<'_>, counters: &mut [usize; 2]) -> fmt::Result {
        match self {
            Circuit::Element(e) => {
                let letter = e.letter();
                if e.param_count() == 1 {
                    let counter = match letter {
                        'R' => &mut counters[0],
                        _ => &mut counters[1],
                    };
                    write!(f, "{}_{}", letter, *counter)?;
                    *counter += 1;
                } else {
                    write!(f, "{letter}_1/{letter}_2")?;
                }
                Ok(())
            }
            Circuit::Series(children) => {
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "-")?;
                    }
                    c.write_description(f, counters)?;
                }
                Ok(())
            }
            Circuit::Parallel(children) => {
                write!(f, "p(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    c.write_description(f, counters)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl FromStr for Circuit {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        Circuit::from_description(s)
    }
}

/// Regenerates a description string in the same language. Indices of
/// single-parameter elements are renumbered, so the output reparses to an
/// impedance-equivalent circuit rather than byte-identical text.
impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counters = [0usize; 2];
        self.write_description(f, &mut counters)
    }
}

/// Parse a description and return its total parameter count.
pub fn parameter_count(description: &str) -> Result<usize, Error> {
    Ok(Circuit::from_description(description)?.parameter_count())
}

/// One-shot evaluation of a description at a single frequency (Hz).
pub fn evaluate(description: &str, params: &[f64], frequency: f64) -> Result<Cplx, Error> {
    Circuit::from_description(description)?.impedance(TAU * frequency, params)
}

// Recursive-descent parser for the description language:
//   series := atom ('-' atom)*
//   atom   := 'p(' series (',' series)* ')' | group
//   group  := token ('/' token)*
//   token  := letter '_' digits
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn series(&mut self) -> Result<Circuit, Error> {
        let mut items = vec![self.atom()?];
        while self.peek() == Some('-') {
            self.pos += 1;
            items.push(self.atom()?);
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap())
        } else {
            Ok(Circuit::Series(items))
        }
    }

    fn atom(&mut self) -> Result<Circuit, Error> {
        if self.src[self.pos..].starts_with("p(") {
            self.pos += 2;
            let mut branches = vec![self.series()?];
            while self.peek() == Some(',') {
                self.pos += 1;
                branches.push(self.series()?);
            }
            if self.peek() != Some(')') {
                return Err(Error::MalformedCircuit("unmatched `p(`".into()));
            }
            self.pos += 1;
            Ok(Circuit::Parallel(branches))
        } else {
            self.group()
        }
    }

    fn group(&mut self) -> Result<Circuit, Error> {
        let (letter, first) = self.token()?;
        let mut suffixes = vec![first];
        while self.peek() == Some('/') {
            self.pos += 1;
            let (next_letter, suffix) = self.token()?;
            if next_letter != letter {
                return Err(Error::MalformedCircuit(format!(
                    "`{next_letter}_{suffix}` continues a `{letter}` element"
                )));
            }
            suffixes.push(suffix);
        }
        element_for(letter, &suffixes)
    }

    fn token(&mut self) -> Result<(char, usize), Error> {
        let letter = self
            .peek()
            .ok_or_else(|| Error::MalformedCircuit("truncated description".into()))?;
        if !matches!(letter, 'R' | 'C' | 'E' | 'W') {
            return Err(Error::MalformedCircuit(format!("unknown element type `{letter}`")));
        }
        self.pos += 1;
        if self.peek() != Some('_') {
            return Err(Error::MalformedCircuit(format!("expected `_` after `{letter}`")));
        }
        self.pos += 1;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.src[start..self.pos];
        let index = digits
            .parse()
            .map_err(|_| Error::MalformedCircuit(format!("bad element index `{letter}_{digits}`")))?;
        Ok((letter, index))
    }
}

fn element_for(letter: char, suffixes: &[usize]) -> Result<Circuit, Error> {
    let element = match (letter, suffixes.len()) {
        ('R', 1) => Element::Resistor,
        ('C', 1) => Element::Capacitor,
        ('W', 1) => Element::Warburg,
        ('W', 2) => Element::FiniteWarburg,
        ('E', 2) => Element::Cpe,
        ('E', 1) => {
            return Err(Error::MalformedCircuit(
                "a constant-phase element takes two parameters: `E_1/E_2`".into(),
            ))
        }
        (_, n) => {
            return Err(Error::MalformedCircuit(format!(
                "`{letter}` element cannot take {n} parameters"
            )))
        }
    };
    if suffixes.len() > 1 {
        // sub-parameter tokens must be numbered 1..k in order
        if suffixes.iter().enumerate().any(|(i, &s)| s != i + 1) {
            return Err(Error::MalformedCircuit(format!(
                "sub-parameters of `{letter}` must be written `{letter}_1/{letter}_2`"
            )));
        }
    }
    Ok(Circuit::Element(element))
}

// ---------- Unit tests ----------
