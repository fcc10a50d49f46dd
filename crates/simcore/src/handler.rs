//! Event handling.

use crate::event::Event;

/// Trait for consuming events in simulation components.
pub trait EventHandler {
    /// Processes an event destined to this component.
    fn on(&mut self, event: Event);
}

/// Enables pattern-matching syntax for processing different types of events
/// by downcasting the payload from [`EventData`](crate::event::EventData) to
/// user-defined types.
///
/// Match arms need not be exhaustive; payloads matching none of the arms are
/// logged as unhandled at the error level.
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}
