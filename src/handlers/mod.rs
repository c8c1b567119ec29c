// Business modules served under /api/:module/:method.
//
// Each module declares which methods it exposes and under which verb,
// and names its parameters; `__`-prefixed names pull in middleware.

pub mod classroom;
pub mod school;
pub mod scope;
pub mod student;
pub mod user;
pub mod utils;

use crate::app::Services;
use crate::dispatch::HandlerModule;

pub fn modules(services: &Services) -> Vec<HandlerModule> {
    vec![
        user::module(services),
        school::module(services),
        classroom::module(services),
        student::module(services),
    ]
}
