/// Abstract VDBE opcodes emitted by the planner.
///
/// This is the subset of the virtual-machine instruction set that WHERE-loop,
/// automatic-index and foreign-key code generation produce. Encoding and
/// execution belong to the bytecode layer; here an opcode is only a tag with
/// operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ── Control flow ────────────────────────────────────────────────────
    /// Unconditional jump to P2.
    Goto = 1,
    /// Store return address in register P1 and jump to P2.
    Gosub,
    /// Jump to the address stored in register P1.
    Return,
    /// Stop execution with result code P1 and error action P2; P4 is the
    /// error message.
    Halt,
    /// Do nothing.
    Noop,
    /// EXPLAIN QUERY PLAN row: P1 select id, P2 loop level, P3 FROM index,
    /// P4 description.
    Explain,

    // ── Constants and registers ─────────────────────────────────────────
    /// Store integer P1 in register P2.
    Integer,
    /// Store 64-bit integer P4 in register P2.
    Int64,
    /// Store real P4 in register P2.
    Real,
    /// Store string P4 in register P2.
    String8,
    /// Store blob P4 in register P2.
    Blob,
    /// Store NULL in registers P2..=P3 (P3 0 means just P2).
    Null,
    /// Copy bound parameter P1 into register P2.
    Variable,
    /// Shallow copy register P1 into P2.
    SCopy,
    /// Deep copy registers P1..P1+P3 into P2..P2+P3.
    Copy,
    /// Apply affinity string P4 to P2 registers starting at P1.
    Affinity,
    /// Convert register P1 to affinity P2.
    Cast,
    /// Build a record from P2 registers starting at P1 into P3 (P4 affinity).
    MakeRecord,
    /// Call function P4 with P5 arguments starting at P2, result in P3.
    Function,

    // ── Arithmetic and logic ────────────────────────────────────────────
    /// r\[P3] = r\[P2] + r\[P1].
    Add,
    /// r\[P3] = r\[P2] - r\[P1].
    Subtract,
    /// r\[P3] = r\[P2] * r\[P1].
    Multiply,
    /// r\[P3] = r\[P2] / r\[P1].
    Divide,
    /// r\[P3] = r\[P2] % r\[P1].
    Remainder,
    /// r\[P3] = r\[P2] || r\[P1].
    Concat,
    /// r\[P3] = r\[P1] & r\[P2].
    BitAnd,
    /// r\[P3] = r\[P1] | r\[P2].
    BitOr,
    /// r\[P3] = r\[P2] << r\[P1].
    ShiftLeft,
    /// r\[P3] = r\[P2] >> r\[P1].
    ShiftRight,
    /// r\[P3] = r\[P1] AND r\[P2] (three-valued).
    And,
    /// r\[P3] = r\[P1] OR r\[P2] (three-valued).
    Or,
    /// r\[P2] = NOT r\[P1].
    Not,
    /// r\[P2] = ~r\[P1].
    BitNot,

    // ── Tests and conditional jumps ─────────────────────────────────────
    /// Jump to P2 if r\[P1] is true (P3: jump if NULL).
    If,
    /// Jump to P2 if r\[P1] is false (P3: jump if NULL).
    IfNot,
    /// Jump to P2 if r\[P1] > 0, decrementing it by P3.
    IfPos,
    /// Jump to P2 if r\[P1] is NULL.
    IsNull,
    /// Jump to P2 if r\[P1] is not NULL.
    NotNull,
    /// Force r\[P1] to an integer; jump to P2 (or fail if P2 is 0) if not
    /// possible.
    MustBeInt,
    /// Compare r\[P3] == r\[P1], jump to P2. P4 collation, P5 flags.
    Eq,
    /// Compare r\[P3] != r\[P1].
    Ne,
    /// Compare r\[P3] < r\[P1].
    Lt,
    /// Compare r\[P3] <= r\[P1].
    Le,
    /// Compare r\[P3] > r\[P1].
    Gt,
    /// Compare r\[P3] >= r\[P1].
    Ge,

    // ── Cursors ─────────────────────────────────────────────────────────
    /// Open read cursor P1 on root page P2 of database P3.
    OpenRead,
    /// Open write cursor P1 on root page P2 of database P3.
    OpenWrite,
    /// Open an ephemeral index cursor P1 with P2 columns for an automatic
    /// index.
    OpenAutoindex,
    /// Open an ephemeral table or index cursor P1 with P2 columns.
    OpenEphemeral,
    /// Close cursor P1.
    Close,
    /// Move cursor P1 to a pseudo-row where every column is NULL.
    NullRow,
    /// Move cursor P1 to its first entry; jump to P2 if empty.
    Rewind,
    /// Move cursor P1 to its last entry; jump to P2 if empty.
    Last,
    /// Advance cursor P1; jump to P2 if another row exists.
    Next,
    /// Retreat cursor P1; jump to P2 if another row exists.
    Prev,
    /// Seek P1 to the first key greater than the P4 registers at P3; jump to
    /// P2 if none.
    SeekGt,
    /// Seek P1 to the first key greater than or equal.
    SeekGe,
    /// Seek P1 to the last key less than.
    SeekLt,
    /// Seek P1 to the last key less than or equal.
    SeekLe,
    /// Jump to P2 if no row with rowid r\[P3] exists in table cursor P1.
    NotExists,
    /// Jump to P2 if the record r\[P3] is a prefix of some index key in P1.
    Found,
    /// Deferred seek of table cursor P1 to rowid r\[P2].
    Seek,
    /// Jump to P2 if the index key at P1 is >= the P4 registers at P3 (P5
    /// adds one to the comparison).
    IdxGE,
    /// Jump to P2 if the index key at P1 is < the P4 registers at P3.
    IdxLT,
    /// Store the rowid of the entry index cursor P1 points to in r\[P2].
    IdxRowid,
    /// Insert record r\[P2] into index cursor P1.
    IdxInsert,
    /// Delete the row cursor P1 points at.
    Delete,
    /// Store the rowid of table cursor P1 in r\[P2].
    Rowid,
    /// Store column P2 of cursor P1 in r\[P3].
    Column,
    /// Test r\[P3] against rowset r\[P1] (set P4), jumping to P2 if present;
    /// then insert it.
    RowSetTest,

    // ── Virtual tables ──────────────────────────────────────────────────
    /// Open virtual-table cursor P1 on table P4.
    VOpen,
    /// Filter virtual cursor P1 with idxNum r\[P3], argc r\[P3+1], args from
    /// r\[P3+2]; jump to P2 if empty.
    VFilter,
    /// Advance virtual cursor P1; jump to P2 if another row exists.
    VNext,

    // ── Constraints and locking ─────────────────────────────────────────
    /// Add P2 to the deferred (P1 != 0) or statement (P1 == 0) FK counter.
    FkCounter,
    /// Jump to P2 if the deferred (P1 != 0) or statement FK counter is zero.
    FkIfZero,
    /// Take a lock on table root P2 of database P1 (P3: write lock).
    TableLock,
}

impl Opcode {
    /// Every opcode, in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::Goto,
        Self::Gosub,
        Self::Return,
        Self::Halt,
        Self::Noop,
        Self::Explain,
        Self::Integer,
        Self::Int64,
        Self::Real,
        Self::String8,
        Self::Blob,
        Self::Null,
        Self::Variable,
        Self::SCopy,
        Self::Copy,
        Self::Affinity,
        Self::Cast,
        Self::MakeRecord,
        Self::Function,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Remainder,
        Self::Concat,
        Self::BitAnd,
        Self::BitOr,
        Self::ShiftLeft,
        Self::ShiftRight,
        Self::And,
        Self::Or,
        Self::Not,
        Self::BitNot,
        Self::If,
        Self::IfNot,
        Self::IfPos,
        Self::IsNull,
        Self::NotNull,
        Self::MustBeInt,
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
        Self::OpenRead,
        Self::OpenWrite,
        Self::OpenAutoindex,
        Self::OpenEphemeral,
        Self::Close,
        Self::NullRow,
        Self::Rewind,
        Self::Last,
        Self::Next,
        Self::Prev,
        Self::SeekGt,
        Self::SeekGe,
        Self::SeekLt,
        Self::SeekLe,
        Self::NotExists,
        Self::Found,
        Self::Seek,
        Self::IdxGE,
        Self::IdxLT,
        Self::IdxRowid,
        Self::IdxInsert,
        Self::Delete,
        Self::Rowid,
        Self::Column,
        Self::RowSetTest,
        Self::VOpen,
        Self::VFilter,
        Self::VNext,
        Self::FkCounter,
        Self::FkIfZero,
        Self::TableLock,
    ];

    /// Get the opcode name as a static string.
    #[allow(clippy::too_many_lines)]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Goto => "Goto",
            Self::Gosub => "Gosub",
            Self::Return => "Return",
            Self::Halt => "Halt",
            Self::Noop => "Noop",
            Self::Explain => "Explain",
            Self::Integer => "Integer",
            Self::Int64 => "Int64",
            Self::Real => "Real",
            Self::String8 => "String8",
            Self::Blob => "Blob",
            Self::Null => "Null",
            Self::Variable => "Variable",
            Self::SCopy => "SCopy",
            Self::Copy => "Copy",
            Self::Affinity => "Affinity",
            Self::Cast => "Cast",
            Self::MakeRecord => "MakeRecord",
            Self::Function => "Function",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::Remainder => "Remainder",
            Self::Concat => "Concat",
            Self::BitAnd => "BitAnd",
            Self::BitOr => "BitOr",
            Self::ShiftLeft => "ShiftLeft",
            Self::ShiftRight => "ShiftRight",
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
            Self::BitNot => "BitNot",
            Self::If => "If",
            Self::IfNot => "IfNot",
            Self::IfPos => "IfPos",
            Self::IsNull => "IsNull",
            Self::NotNull => "NotNull",
            Self::MustBeInt => "MustBeInt",
            Self::Eq => "Eq",
            Self::Ne => "Ne",
            Self::Lt => "Lt",
            Self::Le => "Le",
            Self::Gt => "Gt",
            Self::Ge => "Ge",
            Self::OpenRead => "OpenRead",
            Self::OpenWrite => "OpenWrite",
            Self::OpenAutoindex => "OpenAutoindex",
            Self::OpenEphemeral => "OpenEphemeral",
            Self::Close => "Close",
            Self::NullRow => "NullRow",
            Self::Rewind => "Rewind",
            Self::Last => "Last",
            Self::Next => "Next",
            Self::Prev => "Prev",
            Self::SeekGt => "SeekGt",
            Self::SeekGe => "SeekGe",
            Self::SeekLt => "SeekLt",
            Self::SeekLe => "SeekLe",
            Self::NotExists => "NotExists",
            Self::Found => "Found",
            Self::Seek => "Seek",
            Self::IdxGE => "IdxGE",
            Self::IdxLT => "IdxLT",
            Self::IdxRowid => "IdxRowid",
            Self::IdxInsert => "IdxInsert",
            Self::Delete => "Delete",
            Self::Rowid => "Rowid",
            Self::Column => "Column",
            Self::RowSetTest => "RowSetTest",
            Self::VOpen => "VOpen",
            Self::VFilter => "VFilter",
            Self::VNext => "VNext",
            Self::FkCounter => "FkCounter",
            Self::FkIfZero => "FkIfZero",
            Self::TableLock => "TableLock",
        }
    }

    /// Whether P2 of this opcode is a jump target.
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Goto
                | Self::Gosub
                | Self::If
                | Self::IfNot
                | Self::IfPos
                | Self::IsNull
                | Self::NotNull
                | Self::MustBeInt
                | Self::Eq
                | Self::Ne
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::Rewind
                | Self::Last
                | Self::Next
                | Self::Prev
                | Self::SeekGt
                | Self::SeekGe
                | Self::SeekLt
                | Self::SeekLe
                | Self::NotExists
                | Self::Found
                | Self::IdxGE
                | Self::IdxLT
                | Self::RowSetTest
                | Self::VFilter
                | Self::VNext
                | Self::FkIfZero
        )
    }

    /// The comparison that is true exactly when `self` is false (ignoring
    /// NULL handling). Non-comparison opcodes map to themselves.
    pub const fn negated_comparison(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            other => other,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit flags carried in P5.
pub mod p5 {
    /// Comparison jumps when either operand is NULL.
    pub const JUMPIFNULL: u16 = 0x10;
    /// Comparison stores its result in P2 instead of jumping.
    pub const STOREP2: u16 = 0x20;
    /// NULL compares equal to NULL.
    pub const NULLEQ: u16 = 0x80;
    /// Count this `Next`/`Prev` as a full-scan step.
    pub const FULLSCAN_STEP: u16 = 0x01;
}

/// Error action carried in P2 of `Halt`.
pub mod on_error {
    /// Roll back the statement.
    pub const ABORT: i32 = 2;
    /// Ignore the offending row.
    pub const IGNORE: i32 = 4;
}

/// SQLite result code for constraint failures (`Halt` P1).
pub const SQLITE_CONSTRAINT: i32 = 19;

/// A single VDBE instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct VdbeOp {
    /// The opcode.
    pub opcode: Opcode,
    /// First operand (typically a register number or cursor index).
    pub p1: i32,
    /// Second operand (often a jump target address).
    pub p2: i32,
    /// Third operand.
    pub p3: i32,
    /// Fourth operand (polymorphic: string, collation, key info, etc.).
    pub p4: P4,
    /// Fifth operand (small flags).
    pub p5: u16,
}

/// The P4 operand of a VDBE instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum P4 {
    /// No P4 value.
    None,
    /// A 32-bit integer value.
    Int(i32),
    /// A 64-bit integer value.
    Int64(i64),
    /// A 64-bit float value.
    Real(f64),
    /// A string value.
    Str(String),
    /// A blob value.
    Blob(Vec<u8>),
    /// A collation sequence name.
    Collation(String),
    /// A function name.
    FuncName(String),
    /// A table name.
    Table(String),
    /// Key description of an index: its name plus one collation per column.
    KeyInfo {
        /// Index name.
        index: String,
        /// Collation per key column.
        collations: Vec<String>,
    },
    /// An affinity string (one char per column).
    Affinity(String),
}

// ── VDBE Program Builder ────────────────────────────────────────────────────

use sqlplan_error::{PlanError, Result};

/// An opaque handle representing a forward-reference label.
///
/// Labels allow codegen to emit jump instructions before the target address is
/// known. All labels MUST be resolved before execution begins; unresolved
/// labels are a codegen bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Internal tracking for label resolution.
#[derive(Debug)]
enum LabelState {
    /// Not yet resolved. Holds the instructions whose `p2` field must be
    /// patched on resolution.
    Unresolved(Vec<usize>),
    /// Resolved to a concrete instruction address.
    Resolved(i32),
}

/// Sequential register allocator for the VDBE register file.
///
/// Registers are numbered starting at 1 (register 0 is reserved/unused).
#[derive(Debug)]
pub struct RegisterAllocator {
    next_reg: i32,
    temp_pool: Vec<i32>,
}

impl RegisterAllocator {
    /// Create a new allocator. First allocation returns register 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_reg: 1,
            temp_pool: Vec::new(),
        }
    }

    /// Allocate a single persistent register.
    pub fn alloc_reg(&mut self) -> i32 {
        let reg = self.next_reg;
        self.next_reg += 1;
        reg
    }

    /// Allocate a contiguous block of `n` persistent registers.
    pub fn alloc_regs(&mut self, n: i32) -> i32 {
        let first = self.next_reg;
        self.next_reg += n;
        first
    }

    /// Allocate a temporary register (reuses from pool if available).
    pub fn alloc_temp(&mut self) -> i32 {
        self.temp_pool.pop().unwrap_or_else(|| self.alloc_reg())
    }

    /// Return a temporary register to the reuse pool.
    pub fn free_temp(&mut self, reg: i32) {
        self.temp_pool.push(reg);
    }

    /// The total number of registers allocated (high water mark).
    #[must_use]
    pub const fn count(&self) -> i32 {
        self.next_reg - 1
    }
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A VDBE bytecode program under construction.
///
/// Jump targets are either symbolic [`Label`]s resolved later, or absolute
/// addresses patched in with [`jump_here`](Self::jump_here).
#[derive(Debug)]
pub struct ProgramBuilder {
    ops: Vec<VdbeOp>,
    labels: Vec<LabelState>,
    regs: RegisterAllocator,
}

impl ProgramBuilder {
    /// Create a new empty program builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ops: Vec::new(),
            labels: Vec::new(),
            regs: RegisterAllocator::new(),
        }
    }

    // ── Instruction emission ────────────────────────────────────────────

    /// Emit a single instruction and return its address.
    pub fn emit(&mut self, op: VdbeOp) -> usize {
        let addr = self.ops.len();
        self.ops.push(op);
        addr
    }

    /// Emit an instruction from parts.
    pub fn emit_op(&mut self, opcode: Opcode, p1: i32, p2: i32, p3: i32, p4: P4, p5: u16) -> usize {
        self.emit(VdbeOp {
            opcode,
            p1,
            p2,
            p3,
            p4,
            p5,
        })
    }

    /// Emit an instruction with no P4 or P5.
    pub fn emit3(&mut self, opcode: Opcode, p1: i32, p2: i32, p3: i32) -> usize {
        self.emit_op(opcode, p1, p2, p3, P4::None, 0)
    }

    /// The current address (index of the next instruction to be emitted).
    #[must_use]
    pub fn current_addr(&self) -> usize {
        self.ops.len()
    }

    /// The current address as an `i32` operand.
    #[must_use]
    pub fn current_addr_i32(&self) -> i32 {
        i32::try_from(self.ops.len()).expect("program too large")
    }

    /// Get a reference to the instruction at `addr`.
    #[must_use]
    pub fn op_at(&self, addr: usize) -> Option<&VdbeOp> {
        self.ops.get(addr)
    }

    /// Get a mutable reference to the instruction at `addr`.
    #[must_use]
    pub fn op_at_mut(&mut self, addr: usize) -> Option<&mut VdbeOp> {
        self.ops.get_mut(addr)
    }

    /// All instructions emitted so far.
    #[must_use]
    pub fn ops(&self) -> &[VdbeOp] {
        &self.ops
    }

    /// Point the P2 jump target of the instruction at `addr` at the current
    /// address.
    pub fn jump_here(&mut self, addr: usize) {
        let here = self.current_addr_i32();
        self.change_p2(addr, here);
    }

    /// Overwrite P1 of the instruction at `addr`.
    pub fn change_p1(&mut self, addr: usize, p1: i32) {
        if let Some(op) = self.ops.get_mut(addr) {
            op.p1 = p1;
        }
    }

    /// Overwrite P2 of the instruction at `addr`.
    pub fn change_p2(&mut self, addr: usize, p2: i32) {
        if let Some(op) = self.ops.get_mut(addr) {
            op.p2 = p2;
        }
    }

    /// Overwrite P5 of the most recently emitted instruction.
    pub fn change_p5(&mut self, p5: u16) {
        if let Some(op) = self.ops.last_mut() {
            op.p5 = p5;
        }
    }

    // ── Label system ────────────────────────────────────────────────────

    /// Create a new label for forward-reference jumps.
    #[must_use]
    pub fn emit_label(&mut self) -> Label {
        let id = u32::try_from(self.labels.len()).expect("too many labels");
        self.labels.push(LabelState::Unresolved(Vec::new()));
        Label(id)
    }

    /// Emit a jump instruction whose p2 target is a label.
    pub fn emit_jump_to_label(
        &mut self,
        opcode: Opcode,
        p1: i32,
        p3: i32,
        label: Label,
        p4: P4,
        p5: u16,
    ) -> usize {
        let addr = self.emit(VdbeOp {
            opcode,
            p1,
            p2: -1,
            p3,
            p4,
            p5,
        });
        self.add_label_ref(label, addr);
        addr
    }

    /// Make P2 of the already-emitted instruction at `addr` refer to `label`.
    pub fn set_jump_label(&mut self, addr: usize, label: Label) {
        self.add_label_ref(label, addr);
    }

    fn add_label_ref(&mut self, label: Label, addr: usize) {
        let state = self
            .labels
            .get_mut(label.0 as usize)
            .expect("label must exist");

        match state {
            LabelState::Unresolved(refs) => refs.push(addr),
            LabelState::Resolved(target) => {
                self.ops[addr].p2 = *target;
            }
        }
    }

    /// Resolve a label to the current address and patch all forward refs.
    pub fn resolve_label(&mut self, label: Label) {
        let addr = self.current_addr_i32();
        self.resolve_label_to(label, addr);
    }

    /// Resolve a label to an explicit address.
    pub fn resolve_label_to(&mut self, label: Label, address: i32) {
        let state = self
            .labels
            .get_mut(label.0 as usize)
            .expect("label must exist");

        if let LabelState::Unresolved(refs) = state {
            for &ref_addr in refs.iter() {
                self.ops[ref_addr].p2 = address;
            }
        }
        *state = LabelState::Resolved(address);
    }

    /// The address a label resolved to, if it has been resolved.
    #[must_use]
    pub fn label_address(&self, label: Label) -> Option<i32> {
        match self.labels.get(label.0 as usize) {
            Some(LabelState::Resolved(addr)) => Some(*addr),
            _ => None,
        }
    }

    // ── Register allocation ─────────────────────────────────────────────

    /// Allocate a single persistent register.
    pub fn alloc_reg(&mut self) -> i32 {
        self.regs.alloc_reg()
    }

    /// Allocate a contiguous block of persistent registers.
    pub fn alloc_regs(&mut self, n: i32) -> i32 {
        self.regs.alloc_regs(n)
    }

    /// Allocate a temporary register (reusable).
    pub fn alloc_temp(&mut self) -> i32 {
        self.regs.alloc_temp()
    }

    /// Return a temporary register to the pool.
    pub fn free_temp(&mut self, reg: i32) {
        self.regs.free_temp(reg);
    }

    /// Total registers allocated (high water mark).
    #[must_use]
    pub const fn register_count(&self) -> i32 {
        self.regs.count()
    }

    // ── Finalization ────────────────────────────────────────────────────

    /// Validate all labels are resolved and return the finished program.
    pub fn finish(self) -> Result<VdbeProgram> {
        for (i, state) in self.labels.iter().enumerate() {
            if let LabelState::Unresolved(refs) = state {
                if !refs.is_empty() {
                    return Err(PlanError::Internal(format!(
                        "unresolved label {i} referenced by {} instruction(s)",
                        refs.len()
                    )));
                }
            }
        }

        Ok(VdbeProgram {
            ops: self.ops,
            register_count: self.regs.count(),
        })
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A finalized abstract program.
#[derive(Debug, Clone, PartialEq)]
pub struct VdbeProgram {
    ops: Vec<VdbeOp>,
    register_count: i32,
}

impl VdbeProgram {
    /// The instruction sequence.
    #[must_use]
    pub fn ops(&self) -> &[VdbeOp] {
        &self.ops
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the program is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of registers required.
    #[must_use]
    pub const fn register_count(&self) -> i32 {
        self.register_count
    }

    /// Get the instruction at the given program counter.
    #[must_use]
    pub fn get(&self, pc: usize) -> Option<&VdbeOp> {
        self.ops.get(pc)
    }

    /// Count the instructions with the given opcode.
    #[must_use]
    pub fn count_opcode(&self, opcode: Opcode) -> usize {
        self.ops.iter().filter(|op| op.opcode == opcode).count()
    }

    /// Disassemble the program in `EXPLAIN` layout.
    #[must_use]
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;

        let mut out = String::with_capacity(self.ops.len() * 60);
        out.push_str("addr  opcode           p1    p2    p3    p4                 p5\n");
        out.push_str("----  ---------------  ----  ----  ----  -----------------  --\n");

        for (addr, op) in self.ops.iter().enumerate() {
            let p4_str = match &op.p4 {
                P4::None => String::new(),
                P4::Int(v) => format!("(int){v}"),
                P4::Int64(v) => format!("(i64){v}"),
                P4::Real(v) => format!("(real){v}"),
                P4::Str(s) => format!("(str){s}"),
                P4::Blob(b) => format!("(blob)[{}B]", b.len()),
                P4::Collation(c) => format!("(coll){c}"),
                P4::FuncName(f) => format!("(func){f}"),
                P4::Table(t) => format!("(tbl){t}"),
                P4::KeyInfo { index, collations } => {
                    format!("(keyinfo){index}[{}]", collations.join(","))
                }
                P4::Affinity(a) => format!("(aff){a}"),
            };

            let _ = writeln!(
                &mut out,
                "{addr:<4}  {:<15}  {:<4}  {:<4}  {:<4}  {:<17}  {:<2}",
                op.opcode.name(),
                op.p1,
                op.p2,
                op.p3,
                p4_str,
                op.p5,
            );
        }

        out
    }
}
