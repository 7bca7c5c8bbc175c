//! Type-level cons-lists used to track what a plugin/bean graph provides.
//!
//! `TNil` is the empty list, `TCons<Head, Tail>` prepends `Head`. `Contains<T, Index>`
//! is implemented for every position `T` occurs in a list; `Index` is `Here` for
//! the head or `There<I>` for a match found at position `I` in the tail — the
//! usual zero/successor encoding, so a lookup resolves to exactly one impl and
//! the compiler picks it via type inference rather than a runtime search.

/// The empty type-level list.
pub struct TNil;

/// Prepends `Head` onto `Tail`.
pub struct TCons<Head, Tail> {
    pub head: Head,
    pub tail: Tail,
}

/// Index marker: the match is the head of the list.
pub struct Here;

/// Index marker: the match is at index `I` within the tail.
pub struct There<I>(std::marker::PhantomData<I>);

/// `Self` contains a `T` locatable via `Index`.
pub trait Contains<T, Index> {
    fn get(&self) -> &T;
}

impl<T, Tail> Contains<T, Here> for TCons<T, Tail> {
    fn get(&self) -> &T {
        &self.head
    }
}

impl<Head, Tail, T, I> Contains<T, There<I>> for TCons<Head, Tail>
where
    Tail: Contains<T, I>,
{
    fn get(&self) -> &T {
        self.tail.get()
    }
}

/// `Self` can be built once every item in `Indices` is found in `Provided`.
///
/// `Indices` is a tuple of `Contains` index markers, one per dependency;
/// implementors list a `where Provided: Contains<Dep, I>` bound per
/// dependency and construct themselves from `provided.get()` calls.
pub trait BuildableFrom<Provided, Indices> {
    fn build_from(provided: &Provided) -> Self;
}
