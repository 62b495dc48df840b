use anyhow::{ensure, Context, Result};
use std::fmt::{Debug, Formatter};
use taurus::collections::ref_store::RefVec;
use taurus::create_ref_type;
use taurus::model::symbols::{Sym, SymId, SymbolTable};
use taurus::model::types::TypeId;
use taurus::IntCst;

create_ref_type!(FluentId);

/// A fluent is a state function: a symbol and the types of its parameters.
///
/// For instance `at: Robot x Location` is the fluent with symbol `at` that
/// accepts two parameters of type `Robot` and `Location`. All fluents are
/// boolean valued. Given two symbols `bob: Robot` and `kitchen: Location`,
/// the application `(at bob kitchen)` is a ground atom.
#[derive(Clone, Debug)]
pub struct Fluent {
    /// Human readable name of the fluent.
    pub name: Sym,
    /// Symbol of this fluent.
    pub sym: SymId,
    /// Types of the fluent's parameters.
    pub signature: Vec<TypeId>,
}

impl Fluent {
    /// Atom of this fluent applied to parameterized arguments.
    pub fn applied(&self, args: impl IntoIterator<Item = Term>) -> ParamAtom {
        let args: Vec<Term> = args.into_iter().collect();
        assert_eq!(args.len(), self.signature.len(), "Arity mismatch for {}", self.name);
        ParamAtom { fluent: self.sym, args }
    }

    /// Ground atom of this fluent applied to objects, as an s-expression.
    pub fn ground(&self, args: impl IntoIterator<Item = SymId>) -> Box<[SymId]> {
        let mut sv = vec![self.sym];
        sv.extend(args);
        assert_eq!(sv.len(), self.signature.len() + 1, "Arity mismatch for {}", self.name);
        sv.into_boxed_slice()
    }
}

/// A parameter of an action schema.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: Sym,
    pub tpe: TypeId,
}

impl Param {
    pub fn new(name: impl Into<Sym>, tpe: TypeId) -> Param {
        Param { name: name.into(), tpe }
    }
}

/// Argument of a parameterized atom: either a constant object or a
/// placeholder for the n-th parameter of the enclosing schema.
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Debug)]
pub enum Term {
    Const(SymId),
    Param(usize),
}

/// An atom whose arguments may refer to the parameters of an action schema.
#[derive(Clone, Debug)]
pub struct ParamAtom {
    pub fluent: SymId,
    pub args: Vec<Term>,
}

/// Association of a parameterized atom to a boolean value: a required value
/// when used as a condition, an assignment when used as an effect.
#[derive(Clone, Debug)]
pub struct ParamLit {
    pub atom: ParamAtom,
    pub value: bool,
}

impl ParamLit {
    pub fn new(atom: ParamAtom, value: bool) -> ParamLit {
        ParamLit { atom, value }
    }
}

/// One outcome of a lifted probabilistic effect.
#[derive(Clone, Debug)]
pub struct OutcomeSpec {
    pub weight: f64,
    pub effects: Vec<ParamLit>,
}

impl OutcomeSpec {
    pub fn new(weight: f64, effects: Vec<ParamLit>) -> OutcomeSpec {
        OutcomeSpec { weight, effects }
    }
}

/// A lifted probabilistic effect: a fixed distribution over assignment sets.
/// State-dependent distributions are supported at the ground level, where
/// the MDP consumes them.
#[derive(Clone, Debug, Default)]
pub struct ProbabilisticSpec {
    pub outcomes: Vec<OutcomeSpec>,
}

impl ProbabilisticSpec {
    pub fn new(outcomes: Vec<OutcomeSpec>) -> ProbabilisticSpec {
        ProbabilisticSpec { outcomes }
    }
}

/// Phases of a durative action to which a condition may be attached.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimingKind {
    /// Must hold when the action starts.
    Start,
    /// Must hold over the whole execution.
    OverAll,
    /// Must hold when the action completes.
    End,
}

/// Schema of an action applied in a single instant.
#[derive(Clone, Debug)]
pub struct InstantaneousSchema {
    pub name: Sym,
    pub params: Vec<Param>,
    pub conditions: Vec<ParamLit>,
    pub effects: Vec<ParamLit>,
    pub probabilistic: Vec<ProbabilisticSpec>,
}

impl InstantaneousSchema {
    pub fn new(name: impl Into<Sym>, params: Vec<Param>) -> Self {
        InstantaneousSchema {
            name: name.into(),
            params,
            conditions: Vec::new(),
            effects: Vec::new(),
            probabilistic: Vec::new(),
        }
    }

    pub fn condition(&mut self, atom: ParamAtom, value: bool) -> &mut Self {
        self.conditions.push(ParamLit::new(atom, value));
        self
    }

    pub fn effect(&mut self, atom: ParamAtom, value: bool) -> &mut Self {
        self.effects.push(ParamLit::new(atom, value));
        self
    }

    pub fn probabilistic_effect(&mut self, spec: ProbabilisticSpec) -> &mut Self {
        self.probabilistic.push(spec);
        self
    }
}

/// Schema of an action with a fixed integer duration. Conditions are phased
/// by [`TimingKind`]; effects are split between the start of the execution
/// (the "during" effects) and its completion. Probabilistic effects fire at
/// completion.
#[derive(Clone, Debug)]
pub struct DurativeSchema {
    pub name: Sym,
    pub params: Vec<Param>,
    pub duration: IntCst,
    pub start_conditions: Vec<ParamLit>,
    pub overall_conditions: Vec<ParamLit>,
    pub end_conditions: Vec<ParamLit>,
    pub start_effects: Vec<ParamLit>,
    pub end_effects: Vec<ParamLit>,
    pub probabilistic: Vec<ProbabilisticSpec>,
}

impl DurativeSchema {
    pub fn new(name: impl Into<Sym>, params: Vec<Param>, duration: IntCst) -> Self {
        DurativeSchema {
            name: name.into(),
            params,
            duration,
            start_conditions: Vec::new(),
            overall_conditions: Vec::new(),
            end_conditions: Vec::new(),
            start_effects: Vec::new(),
            end_effects: Vec::new(),
            probabilistic: Vec::new(),
        }
    }

    pub fn condition(&mut self, timing: TimingKind, atom: ParamAtom, value: bool) -> &mut Self {
        let lit = ParamLit::new(atom, value);
        match timing {
            TimingKind::Start => self.start_conditions.push(lit),
            TimingKind::OverAll => self.overall_conditions.push(lit),
            TimingKind::End => self.end_conditions.push(lit),
        }
        self
    }

    pub fn start_effect(&mut self, atom: ParamAtom, value: bool) -> &mut Self {
        self.start_effects.push(ParamLit::new(atom, value));
        self
    }

    pub fn end_effect(&mut self, atom: ParamAtom, value: bool) -> &mut Self {
        self.end_effects.push(ParamLit::new(atom, value));
        self
    }

    pub fn probabilistic_effect(&mut self, spec: ProbabilisticSpec) -> &mut Self {
        self.probabilistic.push(spec);
        self
    }
}

/// A lifted action schema.
#[derive(Clone, Debug)]
pub enum Schema {
    Instantaneous(InstantaneousSchema),
    Durative(DurativeSchema),
}

impl Schema {
    pub fn name(&self) -> &Sym {
        match self {
            Schema::Instantaneous(s) => &s.name,
            Schema::Durative(s) => &s.name,
        }
    }

    pub fn params(&self) -> &[Param] {
        match self {
            Schema::Instantaneous(s) => &s.params,
            Schema::Durative(s) => &s.params,
        }
    }
}

/// A planning problem: typed objects, boolean fluents, lifted action
/// schemas, initial values, goal atoms and a deadline.
///
/// Objects, fluents and schemas are declared programmatically; fluent and
/// action symbols are interned in the same symbol table as the objects,
/// under two reserved types.
pub struct Problem {
    pub table: SymbolTable,
    fluents: RefVec<FluentId, Fluent>,
    schemas: Vec<Schema>,
    /// Explicitly set initial values; atoms absent from this list are
    /// initially false.
    initial: Vec<(Box<[SymId]>, bool)>,
    goals: Vec<Box<[SymId]>>,
    pub deadline: IntCst,
    fluent_type: TypeId,
    action_type: TypeId,
}

impl Problem {
    pub fn new(deadline: IntCst) -> Problem {
        assert!(deadline >= 0, "Negative deadline");
        let mut table = SymbolTable::empty();
        let fluent_type = table.add_type("★fluent★").unwrap();
        let action_type = table.add_type("★action★").unwrap();
        Problem {
            table,
            fluents: RefVec::new(),
            schemas: Vec::new(),
            initial: Vec::new(),
            goals: Vec::new(),
            deadline,
            fluent_type,
            action_type,
        }
    }

    /// The reserved type under which action symbols are interned.
    pub fn action_type(&self) -> TypeId {
        self.action_type
    }

    /// The reserved type under which fluent symbols are interned.
    pub fn fluent_type(&self) -> TypeId {
        self.fluent_type
    }

    pub fn add_type(&mut self, name: impl Into<Sym>) -> Result<TypeId> {
        self.table.add_type(name)
    }

    pub fn add_object(&mut self, name: impl Into<Sym>, tpe: TypeId) -> Result<SymId> {
        ensure!(
            tpe != self.fluent_type && tpe != self.action_type,
            "Objects may not be declared with a reserved type"
        );
        self.table.add_symbol(name, tpe)
    }

    pub fn add_fluent(&mut self, name: impl Into<Sym>, signature: Vec<TypeId>) -> Result<FluentId> {
        let name = name.into();
        let sym = self.table.add_symbol(name.clone(), self.fluent_type)?;
        Ok(self.fluents.push(Fluent { name, sym, signature }))
    }

    pub fn fluent(&self, id: FluentId) -> &Fluent {
        &self.fluents[id]
    }

    pub fn fluents(&self) -> impl Iterator<Item = &Fluent> {
        self.fluents.entries().map(|(_, f)| f)
    }

    pub fn fluent_with_sym(&self, sym: SymId) -> Option<&Fluent> {
        self.fluents.entries().map(|(_, f)| f).find(|f| f.sym == sym)
    }

    /// Declares a new action schema, checking that its conditions and
    /// effects are well formed with respect to the declared fluents,
    /// parameters and object types.
    pub fn add_schema(&mut self, schema: Schema) -> Result<()> {
        ensure!(
            self.schemas.iter().all(|s| s.name() != schema.name()),
            "Duplicated action: {}",
            schema.name()
        );
        match &schema {
            Schema::Instantaneous(s) => {
                for lit in s.conditions.iter().chain(&s.effects) {
                    self.check_atom(&lit.atom, &s.params)
                        .with_context(|| format!("In action {}", s.name))?;
                }
                for spec in &s.probabilistic {
                    self.check_spec(spec, &s.params)
                        .with_context(|| format!("In action {}", s.name))?;
                }
            }
            Schema::Durative(s) => {
                ensure!(s.duration > 0, "Non-positive duration for durative action {}", s.name);
                let lits = s
                    .start_conditions
                    .iter()
                    .chain(&s.overall_conditions)
                    .chain(&s.end_conditions)
                    .chain(&s.start_effects)
                    .chain(&s.end_effects);
                for lit in lits {
                    self.check_atom(&lit.atom, &s.params)
                        .with_context(|| format!("In action {}", s.name))?;
                }
                for spec in &s.probabilistic {
                    self.check_spec(spec, &s.params)
                        .with_context(|| format!("In action {}", s.name))?;
                }
            }
        }
        self.schemas.push(schema);
        Ok(())
    }

    fn check_spec(&self, spec: &ProbabilisticSpec, params: &[Param]) -> Result<()> {
        ensure!(!spec.outcomes.is_empty(), "Empty probabilistic effect");
        ensure!(
            spec.outcomes.iter().all(|o| o.weight > 0.0),
            "Zero-mass outcome in probabilistic effect"
        );
        let total: f64 = spec.outcomes.iter().map(|o| o.weight).sum();
        ensure!((total - 1.0).abs() < 1e-6, "Outcome probabilities sum to {total}");
        for outcome in &spec.outcomes {
            for lit in &outcome.effects {
                self.check_atom(&lit.atom, params)?;
            }
        }
        Ok(())
    }

    fn check_atom(&self, atom: &ParamAtom, params: &[Param]) -> Result<()> {
        let fluent = self
            .fluent_with_sym(atom.fluent)
            .with_context(|| "Unknown fluent in atom".to_string())?;
        ensure!(
            atom.args.len() == fluent.signature.len(),
            "Arity mismatch for fluent {}",
            fluent.name
        );
        for (arg, &expected) in atom.args.iter().zip(&fluent.signature) {
            let actual = match arg {
                Term::Const(sym) => self.table.type_of(*sym),
                Term::Param(i) => {
                    ensure!(*i < params.len(), "Parameter index {i} out of range");
                    params[*i].tpe
                }
            };
            ensure!(
                actual == expected,
                "Type mismatch in application of fluent {}",
                fluent.name
            );
        }
        Ok(())
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    /// Sets the initial value of a ground atom. Atoms never set are false.
    pub fn set_initial(&mut self, atom: Box<[SymId]>, value: bool) {
        self.initial.push((atom, value));
    }

    pub fn initial_values(&self) -> &[(Box<[SymId]>, bool)] {
        &self.initial
    }

    /// Requires the given ground atom to hold in any goal state.
    pub fn add_goal(&mut self, atom: Box<[SymId]>) {
        self.goals.push(atom);
    }

    pub fn goals(&self) -> &[Box<[SymId]>] {
        &self.goals
    }
}

impl Debug for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Problem: {} fluents, {} schemas, {} goals, deadline {}",
            self.fluents.len(),
            self.schemas.len(),
            self.goals.len(),
            self.deadline
        )
    }
}
