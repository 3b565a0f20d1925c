pub mod interval;
pub mod smtlib_printer;
