use super::*;

mod lottery;
mod token;
