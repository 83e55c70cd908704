pub(crate) mod cell;
pub(crate) mod guard;
pub(crate) mod wip;
