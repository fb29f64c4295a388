mod helpers;
mod marker;
mod scheduler;
