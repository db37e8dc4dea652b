//! Callsite descriptors.
//!
//! A callsite describes the shape of one call: the kind of each argument
//! position, which trailing arguments are named (and by what), and whether
//! any argument flattens. Shapes are immutable; the interning store
//! (`interns`) deduplicates them so that equal shapes share one address and
//! dispatch code compares shapes by pointer.
//!
//! Nine common shapes are allocated statically and interned at VM startup;
//! after that they are indistinguishable from dynamically interned shapes.

use std::borrow::Cow;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use quill_core::intern::InternedString;

mod interns;

pub use interns::{CallsiteStats, CallsiteStore, INTERN_ARITY_LIMIT};

// =============================================================================
// Callsite Errors
// =============================================================================

/// Errors from common-shape lookup and the derivation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallsiteError {
    /// Common callsite ID outside the statically known set.
    UnknownCommon {
        /// The rejected ID.
        id: u32,
    },

    /// Positional index outside the valid range for the operator.
    OutOfRange {
        /// The rejected index.
        index: u32,
        /// The callsite's positional count.
        num_pos: u32,
    },

    /// Attempt to derive from a callsite with flattening arguments.
    HasFlattening,
}

impl fmt::Display for CallsiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommon { id } => {
                write!(f, "common callsite id {} unknown", id)
            }
            Self::OutOfRange { index, num_pos } => {
                write!(
                    f,
                    "positional index {} out of range for callsite with {} positionals",
                    index, num_pos
                )
            }
            Self::HasFlattening => {
                write!(f, "cannot transform a callsite with flattening args")
            }
        }
    }
}

impl std::error::Error for CallsiteError {}

/// Result type for callsite operations.
pub type CallsiteResult<T> = Result<T, CallsiteError>;

// =============================================================================
// Argument Flags
// =============================================================================

bitflags::bitflags! {
    /// Kind and modifier bits for one argument position.
    ///
    /// Exactly one kind bit is set per position; the modifier bits mark
    /// named arguments and flattening.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ArgFlags: u8 {
        /// Object argument.
        const OBJ = 1 << 0;
        /// Native integer argument.
        const INT = 1 << 1;
        /// Native float argument.
        const NUM = 1 << 2;
        /// Native string argument.
        const STR = 1 << 3;
        /// Named argument (carries an entry in `arg_names`).
        const NAMED = 1 << 5;
        /// Flattening positional argument.
        const FLAT = 1 << 6;
        /// Flattening named argument.
        const FLAT_NAMED = 1 << 7;
    }
}

impl ArgFlags {
    /// Mask selecting the value-kind bits.
    pub const KIND_MASK: Self = Self::OBJ
        .union(Self::INT)
        .union(Self::NUM)
        .union(Self::STR);

    /// The value kind, with modifiers stripped.
    #[inline]
    pub fn kind(self) -> Self {
        self.intersection(Self::KIND_MASK)
    }

    /// Check if this is a plain positional (no named or flattening bits).
    #[inline]
    pub fn is_positional(self) -> bool {
        !self.intersects(Self::NAMED.union(Self::FLAT).union(Self::FLAT_NAMED))
    }

    /// Check if this position flattens.
    #[inline]
    pub fn is_flattening(self) -> bool {
        self.intersects(Self::FLAT.union(Self::FLAT_NAMED))
    }

    /// Check if this position is named.
    #[inline]
    pub fn is_named(self) -> bool {
        self.contains(Self::NAMED)
    }
}

// =============================================================================
// Callsite
// =============================================================================

/// An immutable descriptor of one call shape.
///
/// Leading positions are positional; the rest are named, with their names
/// in `arg_names` (one interned handle per named argument). The flags of
/// the nine common shapes live in static storage; dynamic shapes own
/// theirs.
#[derive(Debug)]
pub struct Callsite {
    /// Per-position kind and modifier bits.
    arg_flags: Cow<'static, [ArgFlags]>,

    /// Names of the named arguments, or `None` when there are none (or the
    /// names are unknown, which makes the shape uninternable).
    arg_names: Option<Box<[InternedString]>>,

    /// Total argument slots: a named argument occupies a name slot and a
    /// value slot.
    arg_count: u32,

    /// Leading positional count.
    num_pos: u32,

    /// Any position flattens. Flattening shapes cannot be interned.
    has_flattening: bool,

    /// Set once the descriptor resides in the interning store. Atomic so
    /// the static common shapes can be flipped at startup.
    is_interned: AtomicBool,

    /// Companion shape with a prepended invocant slot, if one was built.
    /// The chain is finite and acyclic by construction.
    with_invocant: Option<Box<Callsite>>,
}

impl Callsite {
    /// Build an owned callsite.
    ///
    /// `num_pos` counts the leading positional flags; `arg_names` carries
    /// one handle per named flag, or `None` when the names are unknown.
    pub fn new(
        arg_flags: Vec<ArgFlags>,
        num_pos: u32,
        arg_names: Option<Vec<InternedString>>,
    ) -> Box<Callsite> {
        debug_assert!(num_pos as usize <= arg_flags.len());
        let num_nameds = arg_flags.len() as u32 - num_pos;
        debug_assert!(arg_names
            .as_ref()
            .map_or(true, |names| names.len() as u32 == num_nameds));

        let has_flattening = arg_flags.iter().any(|flag| flag.is_flattening());
        Box::new(Callsite {
            arg_flags: Cow::Owned(arg_flags),
            arg_names: arg_names.map(Vec::into_boxed_slice),
            arg_count: num_pos + 2 * num_nameds,
            num_pos,
            has_flattening,
            is_interned: AtomicBool::new(false),
            with_invocant: None,
        })
    }

    /// Shape with static flag storage, for the common callsites.
    const fn static_shape(arg_flags: &'static [ArgFlags], num_pos: u32) -> Callsite {
        Callsite {
            arg_flags: Cow::Borrowed(arg_flags),
            arg_names: None,
            arg_count: num_pos,
            num_pos,
            has_flattening: false,
            is_interned: AtomicBool::new(false),
            with_invocant: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Per-position flags.
    #[inline]
    pub fn arg_flags(&self) -> &[ArgFlags] {
        &self.arg_flags
    }

    /// Number of flag positions.
    #[inline]
    pub fn flag_count(&self) -> u32 {
        self.arg_flags.len() as u32
    }

    /// Total argument slots.
    #[inline]
    pub fn arg_count(&self) -> u32 {
        self.arg_count
    }

    /// Leading positional count.
    #[inline]
    pub fn num_pos(&self) -> u32 {
        self.num_pos
    }

    /// Number of named arguments.
    #[inline]
    pub fn num_nameds(&self) -> u32 {
        self.flag_count() - self.num_pos
    }

    /// Names of the named arguments, if known.
    #[inline]
    pub fn arg_names(&self) -> Option<&[InternedString]> {
        self.arg_names.as_deref()
    }

    /// Check if any position flattens.
    #[inline]
    pub fn has_flattening(&self) -> bool {
        self.has_flattening
    }

    /// Check if this descriptor resides in the interning store.
    #[inline]
    pub fn is_interned(&self) -> bool {
        self.is_interned.load(Ordering::Acquire)
    }

    /// The companion shape with a prepended invocant slot, if built.
    #[inline]
    pub fn with_invocant(&self) -> Option<&Callsite> {
        self.with_invocant.as_deref()
    }

    #[inline]
    pub(crate) fn mark_interned(&self) {
        self.is_interned.store(true, Ordering::Release);
    }

    // =========================================================================
    // Copying
    // =========================================================================

    /// Deep-clone this callsite, including the with-invocant chain.
    ///
    /// The copy is owned and never interned, whatever the source was.
    pub fn deep_copy(&self) -> Box<Callsite> {
        Box::new(Callsite {
            arg_flags: Cow::Owned(self.arg_flags.to_vec()),
            arg_names: self.arg_names.clone(),
            arg_count: self.arg_count,
            num_pos: self.num_pos,
            has_flattening: self.has_flattening,
            is_interned: AtomicBool::new(false),
            with_invocant: self
                .with_invocant
                .as_ref()
                .map(|companion| companion.deep_copy()),
        })
    }

    /// Attach a companion shape with a prepended invocant slot.
    ///
    /// Only owned callsites can be extended; interned ones are frozen.
    pub fn set_with_invocant(&mut self, companion: Box<Callsite>) {
        self.with_invocant = Some(companion);
    }
}

/// Structural equality under interning: identical flag sequences and
/// pairwise-equal names.
pub fn callsites_equal(a: &Callsite, b: &Callsite) -> bool {
    a.arg_flags() == b.arg_flags()
        && match (a.arg_names(), b.arg_names()) {
            (None, None) => true,
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
}

// =============================================================================
// CallsiteRef
// =============================================================================

/// An owned-or-interned callsite handle.
///
/// `try_intern` turns `Owned` into `Interned` in place, either by adopting
/// an existing equal shape (dropping the owned allocation) or by moving the
/// owned shape into the store for the life of the process.
#[derive(Debug)]
pub enum CallsiteRef {
    /// A shape this handle owns; dropped normally.
    Owned(Box<Callsite>),
    /// A shape owned by the interning store (or static storage).
    Interned(&'static Callsite),
}

impl CallsiteRef {
    /// Borrow the underlying callsite.
    #[inline]
    pub fn as_callsite(&self) -> &Callsite {
        match self {
            CallsiteRef::Owned(boxed) => boxed,
            CallsiteRef::Interned(shape) => shape,
        }
    }

    /// Check whether this handle points into the interning store.
    #[inline]
    pub fn is_interned(&self) -> bool {
        matches!(self, CallsiteRef::Interned(_))
    }

    /// Address identity of two handles.
    #[inline]
    pub fn ptr_eq(&self, other: &CallsiteRef) -> bool {
        ptr::eq(self.as_callsite(), other.as_callsite())
    }

    /// Take the owned box out, leaving an interned placeholder. `None` if
    /// the handle is already interned.
    pub(crate) fn take_owned(&mut self) -> Option<Box<Callsite>> {
        if matches!(self, CallsiteRef::Interned(_)) {
            return None;
        }
        match std::mem::replace(self, CallsiteRef::Interned(&ZERO_ARITY_CALLSITE)) {
            CallsiteRef::Owned(boxed) => Some(boxed),
            CallsiteRef::Interned(_) => unreachable!(),
        }
    }
}

impl std::ops::Deref for CallsiteRef {
    type Target = Callsite;

    #[inline]
    fn deref(&self) -> &Callsite {
        self.as_callsite()
    }
}

impl From<Box<Callsite>> for CallsiteRef {
    #[inline]
    fn from(boxed: Box<Callsite>) -> Self {
        CallsiteRef::Owned(boxed)
    }
}

// =============================================================================
// Common Callsites
// =============================================================================

static OBJ_FLAGS: [ArgFlags; 1] = [ArgFlags::OBJ];
static OBJ_OBJ_FLAGS: [ArgFlags; 2] = [ArgFlags::OBJ, ArgFlags::OBJ];
static OBJ_INT_FLAGS: [ArgFlags; 2] = [ArgFlags::OBJ, ArgFlags::INT];
static OBJ_NUM_FLAGS: [ArgFlags; 2] = [ArgFlags::OBJ, ArgFlags::NUM];
static OBJ_STR_FLAGS: [ArgFlags; 2] = [ArgFlags::OBJ, ArgFlags::STR];
static INT_INT_FLAGS: [ArgFlags; 2] = [ArgFlags::INT, ArgFlags::INT];
static OBJ_OBJ_STR_FLAGS: [ArgFlags; 3] = [ArgFlags::OBJ, ArgFlags::OBJ, ArgFlags::STR];
static OBJ_OBJ_OBJ_FLAGS: [ArgFlags; 3] = [ArgFlags::OBJ, ArgFlags::OBJ, ArgFlags::OBJ];

static ZERO_ARITY_CALLSITE: Callsite = Callsite::static_shape(&[], 0);
static OBJ_CALLSITE: Callsite = Callsite::static_shape(&OBJ_FLAGS, 1);
static OBJ_OBJ_CALLSITE: Callsite = Callsite::static_shape(&OBJ_OBJ_FLAGS, 2);
static OBJ_INT_CALLSITE: Callsite = Callsite::static_shape(&OBJ_INT_FLAGS, 2);
static OBJ_NUM_CALLSITE: Callsite = Callsite::static_shape(&OBJ_NUM_FLAGS, 2);
static OBJ_STR_CALLSITE: Callsite = Callsite::static_shape(&OBJ_STR_FLAGS, 2);
static INT_INT_CALLSITE: Callsite = Callsite::static_shape(&INT_INT_FLAGS, 2);
static OBJ_OBJ_STR_CALLSITE: Callsite = Callsite::static_shape(&OBJ_OBJ_STR_FLAGS, 3);
static OBJ_OBJ_OBJ_CALLSITE: Callsite = Callsite::static_shape(&OBJ_OBJ_OBJ_FLAGS, 3);

/// The statically allocated common shapes, in ID order.
static COMMON_SHAPES: [&Callsite; CommonShape::COUNT] = [
    &ZERO_ARITY_CALLSITE,
    &OBJ_CALLSITE,
    &OBJ_OBJ_CALLSITE,
    &OBJ_INT_CALLSITE,
    &OBJ_NUM_CALLSITE,
    &OBJ_STR_CALLSITE,
    &INT_INT_CALLSITE,
    &OBJ_OBJ_STR_CALLSITE,
    &OBJ_OBJ_OBJ_CALLSITE,
];

/// Stable identifiers for the nine common shapes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonShape {
    /// `()`
    ZeroArity = 0,
    /// `(obj)`
    Obj = 1,
    /// `(obj, obj)`
    ObjObj = 2,
    /// `(obj, int)`
    ObjInt = 3,
    /// `(obj, num)`
    ObjNum = 4,
    /// `(obj, str)`
    ObjStr = 5,
    /// `(int, int)`
    IntInt = 6,
    /// `(obj, obj, str)`
    ObjObjStr = 7,
    /// `(obj, obj, obj)`
    ObjObjObj = 8,
}

impl CommonShape {
    /// Number of common shapes.
    pub const COUNT: usize = 9;

    /// Decode a stable ID.
    pub fn from_id(id: u32) -> CallsiteResult<Self> {
        match id {
            0 => Ok(Self::ZeroArity),
            1 => Ok(Self::Obj),
            2 => Ok(Self::ObjObj),
            3 => Ok(Self::ObjInt),
            4 => Ok(Self::ObjNum),
            5 => Ok(Self::ObjStr),
            6 => Ok(Self::IntInt),
            7 => Ok(Self::ObjObjStr),
            8 => Ok(Self::ObjObjObj),
            _ => Err(CallsiteError::UnknownCommon { id }),
        }
    }

    /// The statically allocated shape for this ID.
    #[inline]
    pub fn get(self) -> &'static Callsite {
        COMMON_SHAPES[self as usize]
    }
}

/// Look up a common shape by its stable integer ID.
pub fn get_common(id: u32) -> CallsiteResult<&'static Callsite> {
    CommonShape::from_id(id).map(CommonShape::get)
}

/// Identity test against the nine static shapes.
pub fn is_common(cs: &Callsite) -> bool {
    COMMON_SHAPES.iter().any(|&shape| ptr::eq(shape, cs))
}

// =============================================================================
// Tests
// =============================================================================
