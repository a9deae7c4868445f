mod scenario;



mod test_handoff;

mod test_tcp;
