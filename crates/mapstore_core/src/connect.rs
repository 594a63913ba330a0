//! Thread-local session binding.
//!
//! Components that cannot thread a session through their call chain can bind
//! one to the current thread and look it up with [`current_session`].
//! Bindings nest; unbinding is tied to a guard so a panic or early return
//! cannot leave a stale binding behind.

use crate::datastore::Datastore;
use crate::error::{CoreResult, DatastoreError};
use crate::session::Session;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static BOUND: RefCell<Vec<Rc<RefCell<Session>>>> = const { RefCell::new(Vec::new()) };
}

/// Guard for one thread-local session binding. Dropping it unbinds the
/// session and hands it back if still wanted.
#[must_use = "dropping the guard unbinds the session"]
pub struct SessionBinding {
    session: Rc<RefCell<Session>>,
}

impl SessionBinding {
    /// Returns the bound session.
    #[must_use]
    pub fn session(&self) -> Rc<RefCell<Session>> {
        Rc::clone(&self.session)
    }
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        BOUND.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().rposition(|s| Rc::ptr_eq(s, &self.session)) {
                stack.remove(position);
            }
        });
    }
}

/// Binds a session to the current thread until the returned guard drops.
pub fn bind_session(session: Session) -> SessionBinding {
    let session = Rc::new(RefCell::new(session));
    BOUND.with(|stack| stack.borrow_mut().push(Rc::clone(&session)));
    tracing::trace!("session bound to thread");
    SessionBinding { session }
}

/// Returns the session most recently bound to the current thread.
///
/// # Errors
///
/// Returns [`DatastoreError::ConnectionNotFound`] when no session is bound.
pub fn current_session() -> CoreResult<Rc<RefCell<Session>>> {
    BOUND.with(|stack| {
        stack
            .borrow()
            .last()
            .map(Rc::clone)
            .ok_or(DatastoreError::ConnectionNotFound)
    })
}

/// Returns true if a session is bound to the current thread.
#[must_use]
pub fn has_current_session() -> bool {
    BOUND.with(|stack| !stack.borrow().is_empty())
}

/// Opens a session from the datastore, binds it for the duration of `f`,
/// and flushes it afterwards if `f` succeeded.
///
/// # Errors
///
/// Returns the error from `f`, or the flush error if the final flush fails.
pub fn with_session<R>(
    datastore: &dyn Datastore,
    f: impl FnOnce(&mut Session) -> CoreResult<R>,
) -> CoreResult<R> {
    let binding = bind_session(datastore.connect());
    let session = binding.session();
    let mut session = session.borrow_mut();
    let result = f(&mut session)?;
    session.flush()?;
    Ok(result)
}
