mod test_concurrent;
mod test_reopen;
