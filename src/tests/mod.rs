mod helpers;
mod sync;
